pub mod api;
pub mod context;
pub mod prompts;
pub mod relay;
pub mod router;
pub mod server;
pub mod state;
pub mod summarizer;

pub use server::GatewayServer;
pub use state::AppState;
