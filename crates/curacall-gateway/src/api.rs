//! Conversation, message and settings endpoints. Thin JSON-over-store
//! handlers; the relay owns everything streaming.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use curacall_common::Error;

use crate::state::AppState;
use crate::summarizer;

fn store_error(e: Error) -> Response {
    error!("store operation failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "error interno de almacenamiento" })),
    )
        .into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}

/// Bodies parse leniently: unreadable JSON acts like an empty object so
/// optional-field endpoints keep working and required-field checks produce
/// the 4xx JSON error.
fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

/// `POST /api/conversations` — `{title?, mode}`.
pub async fn create_conversation(State(state): State<AppState>, raw_body: String) -> Response {
    let body = parse_body(&raw_body);
    let Some(mode) = body
        .get("mode")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
    else {
        return bad_request("mode es requerido");
    };
    let title = body.get("title").and_then(Value::as_str);

    match state.store.lock().unwrap().create_conversation(title, mode) {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => store_error(e),
    }
}

/// `GET /api/conversations` — most recently updated first, message counts
/// included.
pub async fn list_conversations(State(state): State<AppState>) -> Response {
    match state.store.lock().unwrap().list_conversations() {
        Ok(conversations) => Json(conversations).into_response(),
        Err(e) => store_error(e),
    }
}

/// `PATCH /api/conversations/{id}` — `{archived?}`.
pub async fn patch_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    raw_body: String,
) -> Response {
    let archived = parse_body(&raw_body)
        .get("archived")
        .and_then(Value::as_bool);

    let store = state.store.lock().unwrap();
    let result = match archived {
        Some(flag) => store.set_archived(&id, flag),
        // No recognized fields: a no-op read, like an empty update.
        None => store.get_conversation(&id),
    };
    match result {
        Ok(Some(conversation)) => Json(conversation).into_response(),
        Ok(None) => not_found("conversación no encontrada"),
        Err(e) => store_error(e),
    }
}

/// `DELETE /api/conversations/{id}` — removes the conversation and all its
/// messages.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.lock().unwrap().delete_conversation(&id) {
        Ok(true) => Json(json!({ "ok": true })).into_response(),
        Ok(false) => not_found("conversación no encontrada"),
        Err(e) => store_error(e),
    }
}

/// `POST /api/conversations/{id}/summarize` — manual summarization trigger,
/// awaited so the caller sees the outcome.
pub async fn summarize_conversation_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
    raw_body: String,
) -> Response {
    let turns = parse_body(&raw_body)
        .get("turnsToKeep")
        .and_then(Value::as_u64)
        .map(|t| t.max(1) as usize)
        .unwrap_or(state.config.history.summarize_after_turns);

    match summarizer::summarize_conversation(
        state.store.clone(),
        state.local.clone(),
        &id,
        turns,
    )
    .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "message": e.to_string() })),
        )
            .into_response(),
    }
}

/// `GET /api/messages/{conversation_id}` — ordered message list.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    match state.store.lock().unwrap().list_messages(&conversation_id) {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => store_error(e),
    }
}

/// `GET /api/settings`.
pub async fn get_settings(State(state): State<AppState>) -> Response {
    match state.store.lock().unwrap().get_settings() {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => store_error(e),
    }
}

/// `PUT /api/settings` — partial update; unknown fields are ignored.
pub async fn put_settings(State(state): State<AppState>, raw_body: String) -> Response {
    let body = parse_body(&raw_body);
    if !body.is_object() {
        return bad_request("cuerpo JSON requerido");
    }

    let result = state.store.lock().unwrap().update_settings(
        body.get("theme").and_then(Value::as_str),
        body.get("voiceSpeed").and_then(Value::as_str),
        body.get("autoPlay").and_then(Value::as_bool),
        body.get("saveConversations").and_then(Value::as_bool),
        body.get("aiModel").and_then(Value::as_str),
        body.get("responseLength").and_then(Value::as_str),
    );
    match result {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => store_error(e),
    }
}
