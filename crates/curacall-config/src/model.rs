use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listener settings for the HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Origin forwarded to the cloud provider in the `HTTP-Referer` header
    /// and allowed through CORS.
    pub frontend_origin: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            frontend_origin: "http://localhost:5173".to_string(),
        }
    }
}

/// Local LLM runtime (Ollama) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b".to_string(),
        }
    }
}

/// Cloud LLM API (OpenRouter) settings. A missing key means the cloud
/// backend is unavailable; callers surface that, they do not retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "deepseek/deepseek-chat-v3-0324:free".to_string(),
        }
    }
}

/// SSE pacing knobs shared by every stream the gateway opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Interval between `: ping` keep-alive comments.
    pub ping_interval: Duration,
    /// How long to wait for the first token before the fact becomes
    /// observable (logged; only the local path aborts on it).
    pub first_token_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(30_000),
            first_token_timeout: Duration::from_millis(20_000),
        }
    }
}

/// Context-window bounding knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Turns kept verbatim when truncating history for a provider call.
    pub turns_to_keep: usize,
    /// Non-system message count beyond `summarize_after_turns * 2` triggers
    /// background summarization.
    pub summarize_after_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            turns_to_keep: 12,
            summarize_after_turns: 12,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub ollama: OllamaConfig,
    pub openrouter: OpenRouterConfig,
    pub stream: StreamConfig,
    pub history: HistoryConfig,
    /// SQLite path; `:memory:` keeps everything in-process.
    pub db_path: Option<String>,
}
