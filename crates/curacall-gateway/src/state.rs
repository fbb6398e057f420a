use std::sync::{Arc, Mutex};

use curacall_config::AppConfig;
use curacall_db::ConversationStore;
use curacall_providers::{route_model, OllamaProvider, OpenRouterProvider, Provider, ProviderKind};

/// Shared per-process state handed to every handler. Providers are cheap to
/// clone (they wrap a reqwest client); the store serializes access behind a
/// mutex held only across individual statements.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Mutex<ConversationStore>>,
    pub local: OllamaProvider,
    pub cloud: OpenRouterProvider,
}

impl AppState {
    pub fn new(config: AppConfig, store: ConversationStore) -> Self {
        let local = OllamaProvider::new(config.ollama.base_url.clone(), config.ollama.model.clone());
        let cloud = OpenRouterProvider::new(
            config.openrouter.api_key.clone(),
            config.openrouter.base_url.clone(),
            config.openrouter.model.clone(),
            config.gateway.frontend_origin.clone(),
        );
        Self {
            config: Arc::new(config),
            store: Arc::new(Mutex::new(store)),
            local,
            cloud,
        }
    }

    /// Routing is a pure function of the model identifier.
    pub fn select_provider(&self, model: &str) -> Provider {
        match route_model(model, &self.config.ollama.model) {
            ProviderKind::Local => Provider::Local(self.local.clone()),
            ProviderKind::Cloud => Provider::Cloud(self.cloud.clone()),
        }
    }
}
