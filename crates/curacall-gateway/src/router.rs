use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::relay;
use crate::state::AppState;

/// Build the application router with every route the gateway serves.
pub fn build_router(state: AppState) -> Router {
    let cors = match state.config.gateway.frontend_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat/stream", post(relay::chat_stream))
        .route("/api/ai/stream", post(relay::ai_stream))
        .route("/api/ai/health", get(relay::ai_health))
        .route(
            "/api/conversations",
            get(api::list_conversations).post(api::create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            patch(api::patch_conversation).delete(api::delete_conversation),
        )
        .route(
            "/api/conversations/{id}/summarize",
            post(api::summarize_conversation_now),
        )
        .route("/api/messages/{conversation_id}", get(api::list_messages))
        .route(
            "/api/settings",
            get(api::get_settings).put(api::put_settings),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
