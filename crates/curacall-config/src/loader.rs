use std::time::Duration;

use tracing::warn;

use crate::model::AppConfig;

/// Builds an [`AppConfig`] from process environment variables, falling back
/// to defaults for anything unset. Parsing is forgiving: a malformed number
/// logs a warning and keeps the default rather than failing startup.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Some(host) = env_string("CURACALL_HOST") {
            config.gateway.host = host;
        }
        if let Some(port) = env_parse::<u16>("CURACALL_PORT") {
            config.gateway.port = port;
        }
        if let Some(origin) = env_string("FRONTEND_ORIGIN") {
            config.gateway.frontend_origin = origin;
        }

        if let Some(url) = env_string("OLLAMA_BASE_URL") {
            config.ollama.base_url = url;
        }
        if let Some(model) = env_string("OLLAMA_MODEL") {
            config.ollama.model = model;
        }

        config.openrouter.api_key = env_string("OPENROUTER_API_KEY");
        if let Some(url) = env_string("OPENROUTER_BASE_URL") {
            config.openrouter.base_url = url;
        }
        if let Some(model) = env_string("OPENROUTER_MODEL").or_else(|| env_string("MODEL")) {
            config.openrouter.model = model;
        }

        // Floors keep a typo from turning the keep-alive into a busy loop.
        if let Some(ms) = env_parse::<u64>("SSE_PING_MS") {
            config.stream.ping_interval = Duration::from_millis(ms.max(5_000));
        }
        if let Some(ms) = env_parse::<u64>("FIRST_TOKEN_TIMEOUT_MS")
            .or_else(|| env_parse::<u64>("OPENROUTER_TIMEOUT_MS"))
        {
            config.stream.first_token_timeout = Duration::from_millis(ms.max(5_000));
        }

        if let Some(turns) = env_parse::<usize>("CHAT_TURNS_LIMIT") {
            config.history.turns_to_keep = turns.max(1);
        }
        if let Some(turns) = env_parse::<usize>("SUMMARIZE_AFTER_TURNS") {
            config.history.summarize_after_turns = turns.max(1);
        }

        config.db_path = env_string("CURACALL_DB");

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable {key}={raw}");
            None
        }
    }
}
