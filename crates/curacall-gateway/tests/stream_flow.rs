//! End-to-end tests: a real gateway listener relaying from a mock upstream,
//! consumed both through the client crate and through raw SSE frames so the
//! wire contract itself is pinned down.

use axum::body::Body;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use curacall_client::{ChatClient, ChatEvent};
use curacall_common::{ChatMessage, FrameBuffer, SseFrame};
use curacall_config::AppConfig;
use curacall_db::ConversationStore;
use curacall_gateway::router::build_router;
use curacall_gateway::AppState;

async fn spawn_app(app: Router) -> (String, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await
            .unwrap();
    });
    (format!("http://{addr}"), tx)
}

/// Mock Ollama: tag listing plus a chat endpoint that streams two deltas on
/// streaming calls and answers a canned summary on one-shot calls.
async fn mock_ollama_ok() -> (String, oneshot::Sender<()>) {
    let app = Router::new()
        .route(
            "/api/tags",
            get(|| async { Json(json!({ "models": [ { "name": "llama3.1:8b" } ] })) }),
        )
        .route(
            "/api/chat",
            post(|Json(payload): Json<Value>| async move {
                if payload["stream"].as_bool().unwrap_or(false) {
                    concat!(
                        "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
                        "{\"message\":{\"role\":\"assistant\",\"content\":\" there\"},\"done\":false}\n",
                        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
                    )
                    .to_string()
                    .into_response()
                } else {
                    json!({
                        "message": { "role": "assistant", "content": "- resumen de la charla" },
                        "done": true
                    })
                    .to_string()
                    .into_response()
                }
            }),
        );
    spawn_app(app).await
}

/// Mock Ollama that emits one delta and then severs the connection.
async fn mock_ollama_dies_mid_stream() -> (String, oneshot::Sender<()>) {
    let app = Router::new()
        .route(
            "/api/tags",
            get(|| async { Json(json!({ "models": [ { "name": "llama3.1:8b" } ] })) }),
        )
        .route(
            "/api/chat",
            post(|| async {
                let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                    Ok(Bytes::from_static(
                        b"{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
                    )),
                    Err(std::io::Error::other("connection reset")),
                ];
                (
                    [(header::CONTENT_TYPE, "application/x-ndjson")],
                    Body::from_stream(futures::stream::iter(chunks)),
                )
            }),
        );
    spawn_app(app).await
}

async fn start_gateway(mut config: AppConfig) -> (String, AppState, oneshot::Sender<()>) {
    config.gateway.port = 0;
    let store = ConversationStore::in_memory().unwrap();
    let state = AppState::new(config, store);
    let (url, stop) = spawn_app(build_router(state.clone())).await;
    (url, state, stop)
}

/// Raw event-level view of one stream, comments already filtered out.
async fn collect_frames(base: &str, path: &str, body: Value) -> Vec<SseFrame> {
    let res = reqwest::Client::new()
        .post(format!("{base}{path}"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(
        content_type.starts_with("text/event-stream"),
        "unexpected content type {content_type}"
    );

    let mut frames = FrameBuffer::new();
    let mut out = Vec::new();
    let mut bytes = res.bytes_stream();
    while let Some(chunk) = bytes.next().await {
        frames.push(&chunk.unwrap());
        while let Some(frame) = frames.next_frame() {
            out.push(frame);
        }
    }
    out
}

/// Polls until the conversation holds at least `count` messages (the
/// relay's persistence runs after the last SSE frame is flushed).
async fn wait_for_messages(
    state: &AppState,
    conversation_id: &str,
    count: usize,
) -> Vec<curacall_db::MessageRow> {
    for _ in 0..50 {
        let messages = state
            .store
            .lock()
            .unwrap()
            .list_messages(conversation_id)
            .unwrap();
        if messages.len() >= count {
            return messages;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    state
        .store
        .lock()
        .unwrap()
        .list_messages(conversation_id)
        .unwrap()
}

fn event_names(frames: &[SseFrame]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f.event.clone().unwrap_or_else(|| "data".to_string()))
        .collect()
}

#[tokio::test]
async fn streamed_turn_reaches_client_and_store() {
    let (ollama_url, stop_ollama) = mock_ollama_ok().await;
    let mut config = AppConfig::default();
    config.ollama.base_url = ollama_url;
    let (gateway_url, state, stop_gateway) = start_gateway(config).await;

    let conversation = state
        .store
        .lock()
        .unwrap()
        .create_conversation(Some("prueba"), "chat")
        .unwrap();

    let client = ChatClient::new(gateway_url);
    let mut stream = client.stream_conversation(
        &conversation.id,
        vec![ChatMessage::user("hello")],
        Some("llama3.1:8b".to_string()),
    );

    let mut deltas = Vec::new();
    let mut full = None;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            ChatEvent::Delta(d) => deltas.push(d),
            ChatEvent::Done(f) => full = Some(f),
        }
    }
    assert_eq!(deltas, vec!["Hi".to_string(), " there".to_string()]);
    assert_eq!(full.as_deref(), Some("Hi there"));

    // The assistant row lands right after the stream closes; give the
    // response task a moment to finish.
    let messages = wait_for_messages(&state, &conversation.id, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "Hi there");

    let _ = stop_ollama.send(());
    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn wire_framing_matches_the_contract_exactly() {
    let (ollama_url, stop_ollama) = mock_ollama_ok().await;
    let mut config = AppConfig::default();
    config.ollama.base_url = ollama_url;
    let (gateway_url, state, stop_gateway) = start_gateway(config).await;

    let conversation = state
        .store
        .lock()
        .unwrap()
        .create_conversation(None, "chat")
        .unwrap();

    let frames = collect_frames(
        &gateway_url,
        "/api/chat/stream",
        json!({
            "conversationId": conversation.id,
            "messages": [ { "role": "user", "content": "hello" } ],
            "model": "llama3.1:8b",
        }),
    )
    .await;

    assert_eq!(event_names(&frames), vec!["token", "token", "done"]);
    assert_eq!(frames[0].data, "{\"text\":\"Hi\"}");
    assert_eq!(frames[1].data, "{\"text\":\" there\"}");
    assert_eq!(frames[2].data, "{}");

    let _ = stop_ollama.send(());
    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn unreachable_local_runtime_falls_back_exactly_once() {
    let mut config = AppConfig::default();
    // nothing listens here
    config.ollama.base_url = "http://127.0.0.1:9".to_string();
    let (gateway_url, state, stop_gateway) = start_gateway(config).await;

    let conversation = state
        .store
        .lock()
        .unwrap()
        .create_conversation(None, "chat")
        .unwrap();

    let frames = collect_frames(
        &gateway_url,
        "/api/chat/stream",
        json!({
            "conversationId": conversation.id,
            "messages": [ { "role": "user", "content": "hola" } ],
            "model": "llama3.1:8b",
        }),
    )
    .await;

    assert_eq!(event_names(&frames), vec!["fallback", "done"]);
    let payload: Value = serde_json::from_str(&frames[0].data).unwrap();
    assert!(payload["text"].as_str().unwrap().contains("llama3.1:8b"));

    // no assistant row was written for a fallback-only turn
    let messages = state
        .store
        .lock()
        .unwrap()
        .list_messages(&conversation.id)
        .unwrap();
    assert!(messages.iter().all(|m| m.role != "assistant"));

    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn failure_after_first_token_ends_without_fallback() {
    let (ollama_url, stop_ollama) = mock_ollama_dies_mid_stream().await;
    let mut config = AppConfig::default();
    config.ollama.base_url = ollama_url;
    let (gateway_url, state, stop_gateway) = start_gateway(config).await;

    let conversation = state
        .store
        .lock()
        .unwrap()
        .create_conversation(None, "chat")
        .unwrap();

    let frames = collect_frames(
        &gateway_url,
        "/api/chat/stream",
        json!({
            "conversationId": conversation.id,
            "messages": [ { "role": "user", "content": "hola" } ],
            "model": "llama3.1:8b",
        }),
    )
    .await;

    // tokens so far, then done; no fallback, nothing retracted
    assert_eq!(event_names(&frames), vec!["token", "done"]);
    assert_eq!(frames[0].data, "{\"text\":\"Hi\"}");

    // the partial answer is still persisted
    let messages = wait_for_messages(&state, &conversation.id, 2).await;
    let assistant: Vec<_> = messages.iter().filter(|m| m.role == "assistant").collect();
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content, "Hi");

    let _ = stop_ollama.send(());
    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn cloud_without_api_key_falls_back() {
    let mut config = AppConfig::default();
    config.openrouter.api_key = None;
    let (gateway_url, _state, stop_gateway) = start_gateway(config).await;

    let frames = collect_frames(
        &gateway_url,
        "/api/ai/stream",
        json!({ "text": "hola", "model": "deepseek/deepseek-chat-v3-0324:free" }),
    )
    .await;

    assert_eq!(event_names(&frames), vec!["fallback", "done"]);
    let payload: Value = serde_json::from_str(&frames[0].data).unwrap();
    assert!(payload["text"].as_str().unwrap().contains("Configuración"));

    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn malformed_bodies_get_a_json_error_not_a_stream() {
    let (gateway_url, _state, stop_gateway) = start_gateway(AppConfig::default()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{gateway_url}/api/chat/stream"))
        .json(&json!({ "messages": "not-an-array" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert!(body["message"].is_string());

    let res = client
        .post(format!("{gateway_url}/api/ai/stream"))
        .json(&json!({ "text": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn conversation_crud_round_trip() {
    let (gateway_url, _state, stop_gateway) = start_gateway(AppConfig::default()).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{gateway_url}/api/conversations"))
        .json(&json!({ "mode": "voice", "title": "Mi consulta" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["mode"], "voice");
    assert_eq!(created["archived"], false);

    let missing_mode = client
        .post(format!("{gateway_url}/api/conversations"))
        .json(&json!({ "title": "sin modo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_mode.status(), 400);

    let listed: Vec<Value> = client
        .get(format!("{gateway_url}/api/conversations"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["messageCount"], 0);

    let patched: Value = client
        .patch(format!("{gateway_url}/api/conversations/{id}"))
        .json(&json!({ "archived": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched["archived"], true);

    let deleted: Value = client
        .delete(format!("{gateway_url}/api/conversations/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["ok"], true);

    let gone = client
        .delete(format!("{gateway_url}/api/conversations/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);

    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn long_conversation_triggers_background_summarization() {
    let (ollama_url, stop_ollama) = mock_ollama_ok().await;
    let mut config = AppConfig::default();
    config.ollama.base_url = ollama_url;
    config.history.summarize_after_turns = 1;
    let (gateway_url, state, stop_gateway) = start_gateway(config).await;

    let conversation = state
        .store
        .lock()
        .unwrap()
        .create_conversation(None, "chat")
        .unwrap();
    // Seed enough history to cross the 1-turn threshold once this turn's
    // pair lands.
    for i in 0..3 {
        let store = state.store.lock().unwrap();
        store
            .append_message(&conversation.id, "user", &format!("q{i}"))
            .unwrap();
        store
            .append_message(&conversation.id, "assistant", &format!("a{i}"))
            .unwrap();
    }

    let client = ChatClient::new(gateway_url);
    let mut stream = client.stream_conversation(
        &conversation.id,
        vec![ChatMessage::user("otra pregunta")],
        Some("llama3.1:8b".to_string()),
    );
    while stream.next().await.is_some() {}

    // The summarizer runs detached; poll briefly for its write.
    let mut summary = None;
    for _ in 0..50 {
        summary = state
            .store
            .lock()
            .unwrap()
            .latest_system_message(&conversation.id)
            .unwrap();
        if summary.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    let summary = summary.expect("background summarization never landed");
    assert!(summary.content.contains("resumen"));

    let _ = stop_ollama.send(());
    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn health_and_settings_endpoints_respond() {
    let (gateway_url, _state, stop_gateway) = start_gateway(AppConfig::default()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{gateway_url}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "running");
    assert!(health["version"].is_string());

    let settings: Value = client
        .get(format!("{gateway_url}/api/settings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(settings["theme"], "dark-ocean");

    let updated: Value = client
        .put(format!("{gateway_url}/api/settings"))
        .json(&json!({ "theme": "light", "autoPlay": false }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["theme"], "light");
    assert_eq!(updated["autoPlay"], false);
    assert_eq!(updated["aiModel"], "llama3.1:8b");

    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn ai_health_without_key_reports_unavailable() {
    let (gateway_url, _state, stop_gateway) = start_gateway(AppConfig::default()).await;

    let res = reqwest::Client::new()
        .get(format!("{gateway_url}/api/ai/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["model"], "deepseek/deepseek-chat-v3-0324:free");
    assert!(body["message"].as_str().unwrap().contains("OPENROUTER_API_KEY"));

    let _ = stop_gateway.send(());
}

#[tokio::test]
async fn messages_endpoint_returns_ordered_history() {
    let (gateway_url, state, stop_gateway) = start_gateway(AppConfig::default()).await;

    let conversation = state
        .store
        .lock()
        .unwrap()
        .create_conversation(None, "chat")
        .unwrap();
    {
        let store = state.store.lock().unwrap();
        store.append_message(&conversation.id, "user", "uno").unwrap();
        store
            .append_message(&conversation.id, "assistant", "dos")
            .unwrap();
    }

    let messages: Vec<Value> = reqwest::Client::new()
        .get(format!("{gateway_url}/api/messages/{}", conversation.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "uno");
    assert_eq!(messages[1]["content"], "dos");

    let _ = stop_gateway.send(());
}
