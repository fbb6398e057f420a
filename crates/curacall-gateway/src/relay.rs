//! The streaming relay: the single entry point a client calls to get a live
//! assistant response. Owns provider selection, the SSE wire contract, the
//! fallback-once rule, and the persistence side effects around a turn.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use curacall_common::{ChatMessage, ChatRole};
use curacall_providers::{route_model, ChatOptions, Provider, ProviderKind, StreamEvent};

use crate::context::bounded_history;
use crate::prompts;
use crate::state::AppState;
use crate::summarizer;

/// One planned turn, everything the response generator needs to own.
struct TurnPlan {
    merged: Vec<ChatMessage>,
    model: String,
    /// `None` for the free-form endpoint, which persists nothing.
    conversation_id: Option<String>,
    prior_non_system: usize,
    user_persisted: bool,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}

fn token_event(text: &str) -> Event {
    Event::default()
        .event("token")
        .data(json!({ "text": text }).to_string())
}

fn fallback_event(text: &str) -> Event {
    Event::default()
        .event("fallback")
        .data(json!({ "text": text }).to_string())
}

fn done_event() -> Event {
    Event::default().event("done").data("{}")
}

/// Lenient body parsing: anything unreadable becomes `Null`, and the
/// required-field checks below turn that into the 4xx JSON error the
/// contract promises (never a half-opened stream).
fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

/// `POST /api/chat/stream` — persisted-conversation streaming.
pub async fn chat_stream(State(state): State<AppState>, raw_body: String) -> Response {
    let body = parse_body(&raw_body);
    let conversation_id = body
        .get("conversationId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let raw_messages = body.get("messages").and_then(Value::as_array).cloned();
    let (Some(conversation_id), Some(raw_messages)) = (conversation_id, raw_messages) else {
        return bad_request("conversationId y messages son requeridos");
    };
    let messages: Vec<ChatMessage> = match serde_json::from_value(Value::Array(raw_messages)) {
        Ok(messages) => messages,
        Err(_) => return bad_request("messages tiene un formato inválido"),
    };
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&state.config.ollama.model)
        .to_string();

    // Bounded history from the store. A failing store downgrades the turn
    // to history-less, it never blocks it.
    let turns = state.config.history.turns_to_keep;
    let (history, prior_non_system) =
        match state.store.lock().unwrap().list_messages(&conversation_id) {
            Ok(rows) => {
                let bounded = bounded_history(&rows, turns);
                let count = bounded.non_system_count;
                (bounded.into_messages(), count)
            }
            Err(e) => {
                warn!("history load failed, continuing without it: {e}");
                (Vec::new(), 0)
            }
        };

    // Persist the incoming user message before streaming starts. There is
    // no compensating delete if the provider call then fails entirely; the
    // orphaned user row is an accepted partial-write.
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User && !m.content.trim().is_empty())
        .cloned();
    let mut user_persisted = false;
    if let Some(user) = &last_user {
        match state
            .store
            .lock()
            .unwrap()
            .append_message(&conversation_id, "user", &user.content)
        {
            Ok(_) => user_persisted = true,
            Err(e) => warn!("failed to persist user message: {e}"),
        }
    }

    let mut merged = Vec::with_capacity(history.len() + messages.len() + 1);
    merged.push(ChatMessage::system(prompts::CHAT_SYSTEM_PROMPT));
    merged.extend(history);
    merged.extend(messages);

    stream_turn(
        state,
        TurnPlan {
            merged,
            model,
            conversation_id: Some(conversation_id),
            prior_non_system,
            user_persisted,
        },
    )
}

/// `POST /api/ai/stream` — single free-form prompt plus bounded caller-side
/// history; nothing is persisted.
pub async fn ai_stream(State(state): State<AppState>, raw_body: String) -> Response {
    let body = parse_body(&raw_body);
    let Some(text) = body
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return bad_request("Se requiere 'text'");
    };
    let history: Vec<ChatMessage> = body
        .get("history")
        .cloned()
        .and_then(|h| serde_json::from_value(h).ok())
        .unwrap_or_default();
    let lang = body.get("lang").and_then(Value::as_str);
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&state.config.openrouter.model)
        .to_string();

    let keep = state.config.history.turns_to_keep * 2;
    let start = history.len().saturating_sub(keep);

    let mut merged = Vec::with_capacity(history.len() + 2);
    merged.push(ChatMessage::system(prompts::ai_system_prompt(lang)));
    merged.extend_from_slice(&history[start..]);
    merged.push(ChatMessage::user(text));

    stream_turn(
        state,
        TurnPlan {
            merged,
            model,
            conversation_id: None,
            prior_non_system: 0,
            user_persisted: false,
        },
    )
}

#[derive(Deserialize)]
pub struct HealthQuery {
    model: Option<String>,
}

/// `GET /api/ai/health` — upstream availability without consuming a
/// completion. Routes on the (optional) model like the relay does.
pub async fn ai_health(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let model = query
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&state.config.openrouter.model)
        .to_string();

    let health = match route_model(&model, &state.config.ollama.model) {
        ProviderKind::Local => state.local.health(&model).await,
        ProviderKind::Cloud => state.cloud.health(Some(&model)).await,
    };

    let status = if !health.ok && health.message.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(health)).into_response()
}

/// Runs one turn as an SSE response. The generator owns the whole stream
/// session: accumulation buffer, sent-any-token flag, and the in-flight
/// provider stream — dropping it on client disconnect cancels the upstream
/// request. Every path out of here emits exactly one `done`.
fn stream_turn(state: AppState, plan: TurnPlan) -> Response {
    let ping = state.config.stream.ping_interval;
    let first_token_timeout = state.config.stream.first_token_timeout;

    let stream = async_stream::stream! {
        let provider = state.select_provider(&plan.model);

        // Pre-stream availability gates: these are the only failures that
        // get a specific message instead of the generic apology.
        match &provider {
            Provider::Local(local) => {
                if !local.ensure_model_available(&plan.model).await {
                    yield Ok::<_, Infallible>(fallback_event(
                        &prompts::fallback_model_unavailable(&plan.model),
                    ));
                    yield Ok(done_event());
                    return;
                }
            }
            Provider::Cloud(cloud) => {
                if !cloud.has_api_key() {
                    yield Ok(fallback_event(prompts::FALLBACK_MISSING_KEY));
                    yield Ok(done_event());
                    return;
                }
            }
        }

        let options = match provider.kind() {
            ProviderKind::Local => ChatOptions {
                temperature: Some(0.7),
                context_window: Some(4096),
                first_token_timeout: Some(first_token_timeout),
                ..Default::default()
            },
            ProviderKind::Cloud => ChatOptions {
                temperature: Some(0.7),
                max_tokens: Some(2048),
                first_token_timeout: Some(first_token_timeout),
                ..Default::default()
            },
        };

        let mut upstream = match provider.stream_chat(&plan.merged, &plan.model, &options).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("provider refused the stream: {e}");
                yield Ok(fallback_event(prompts::FALLBACK_ENGINE_PROBLEM));
                yield Ok(done_event());
                return;
            }
        };

        let mut accumulated = String::new();
        let mut sent_any_token = false;

        loop {
            // The local runtime gets a hard first-token deadline; a model
            // that never answers is indistinguishable from a hung one. The
            // cloud adapter only logs its own deadline and keeps reading.
            let event = if !sent_any_token && provider.kind() == ProviderKind::Local {
                match tokio::time::timeout(first_token_timeout, upstream.next()).await {
                    Ok(event) => event,
                    Err(_) => {
                        warn!("no token from local provider before deadline");
                        yield Ok(fallback_event(prompts::FALLBACK_ENGINE_PROBLEM));
                        break;
                    }
                }
            } else {
                upstream.next().await
            };

            match event {
                Some(Ok(StreamEvent::Delta(delta))) => {
                    sent_any_token = true;
                    accumulated.push_str(&delta);
                    yield Ok(token_event(&delta));
                }
                Some(Ok(StreamEvent::Done)) | None => break,
                Some(Err(e)) => {
                    warn!("upstream failed mid-stream: {e}");
                    if !sent_any_token {
                        yield Ok(fallback_event(prompts::FALLBACK_ENGINE_PROBLEM));
                    }
                    // Tokens already shown stay as a best-effort partial
                    // answer; nothing is retracted.
                    break;
                }
            }
        }

        yield Ok(done_event());

        finish_turn(&state, &plan, &accumulated);
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(ping).text("ping"))
        .into_response()
}

/// Post-stream persistence and the summarization trigger. Runs inside the
/// response generator, so a client that disconnected mid-stream skips it —
/// the documented partial-write gap.
fn finish_turn(state: &AppState, plan: &TurnPlan, accumulated: &str) {
    let Some(conversation_id) = &plan.conversation_id else {
        return;
    };

    let mut assistant_persisted = false;
    if !accumulated.trim().is_empty() {
        match state
            .store
            .lock()
            .unwrap()
            .append_message(conversation_id, "assistant", accumulated)
        {
            Ok(_) => assistant_persisted = true,
            Err(e) => warn!("failed to persist assistant message: {e}"),
        }
    }

    let threshold = state.config.history.summarize_after_turns;
    let total = plan.prior_non_system
        + plan.user_persisted as usize
        + assistant_persisted as usize;
    if total > threshold * 2 {
        summarizer::spawn_summarize(
            state.store.clone(),
            state.local.clone(),
            conversation_id.clone(),
            threshold,
        );
    }
}
