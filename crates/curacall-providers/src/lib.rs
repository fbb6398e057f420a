pub mod ollama;
pub mod openrouter;

use std::time::Duration;

use futures::stream::BoxStream;
use serde::Serialize;

use curacall_common::Result;

pub use ollama::OllamaProvider;
pub use openrouter::OpenRouterProvider;

/// One unit of a live completion: an incremental text fragment, or the end
/// of the sequence. Every adapter emits `Done` exactly once, whether the
/// upstream signalled completion explicitly or simply closed the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

/// The async sequence an adapter hands back. Dropping it cancels the
/// in-flight upstream request.
pub type DeltaStream = BoxStream<'static, Result<StreamEvent>>;

/// Generation knobs shared by both adapters. Unset fields are omitted from
/// the upstream request body.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    /// Local context window (`num_ctx`).
    pub context_window: Option<u32>,
    /// `num_predict` locally, `max_tokens` in the cloud.
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub stop: Vec<String>,
    /// Deadline for the first token. The cloud adapter only logs when it
    /// passes; callers that want to abort race the stream themselves.
    pub first_token_timeout: Option<Duration>,
}

/// Upstream availability snapshot served by `GET /api/ai/health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_model: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Cloud,
}

/// Pure routing over the model identifier string; nothing else influences
/// provider selection. Cloud catalog ids carry a vendor prefix
/// (`vendor/model`), so a slash wins over everything; otherwise a colon tag
/// (`llama3.1:8b`), a `llama` family name, or the configured local model
/// routes locally.
pub fn route_model(model: &str, local_model: &str) -> ProviderKind {
    if model.contains('/') {
        return ProviderKind::Cloud;
    }
    if model == local_model || model.contains(':') || model.contains("llama") {
        return ProviderKind::Local;
    }
    ProviderKind::Cloud
}

/// The closed set of backends a turn can be relayed through.
#[derive(Clone)]
pub enum Provider {
    Local(OllamaProvider),
    Cloud(OpenRouterProvider),
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Local(_) => ProviderKind::Local,
            Provider::Cloud(_) => ProviderKind::Cloud,
        }
    }

    pub async fn stream_chat(
        &self,
        messages: &[curacall_common::ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<DeltaStream> {
        match self {
            Provider::Local(ollama) => ollama.stream_chat(messages, model, options).await,
            Provider::Cloud(openrouter) => {
                openrouter.stream_chat(messages, Some(model), options).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_tagged_models_route_locally() {
        assert_eq!(route_model("llama3.1:8b", "llama3.1:8b"), ProviderKind::Local);
        assert_eq!(route_model("qwen2:7b", "llama3.1:8b"), ProviderKind::Local);
    }

    #[test]
    fn vendor_prefixed_models_route_to_cloud() {
        assert_eq!(
            route_model("deepseek/deepseek-chat-v3-0324:free", "llama3.1:8b"),
            ProviderKind::Cloud
        );
        assert_eq!(
            route_model("mistralai/mistral-7b-instruct", "llama3.1:8b"),
            ProviderKind::Cloud
        );
    }

    #[test]
    fn bare_names_route_by_family_and_configured_model() {
        assert_eq!(route_model("llama3", "llama3.1:8b"), ProviderKind::Local);
        assert_eq!(route_model("phi3", "phi3"), ProviderKind::Local);
        assert_eq!(route_model("gpt-4o-mini", "llama3.1:8b"), ProviderKind::Cloud);
    }
}
