use curacall_common::{Error, Result};
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Owns the listener lifecycle for the HTTP gateway.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Binds and serves until the process is stopped.
    pub async fn serve(self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.gateway.host, self.state.config.gateway.port
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
        info!("curacall gateway listening on http://{addr}");

        axum::serve(listener, build_router(self.state))
            .await
            .map_err(|e| Error::Config(format!("server error: {e}")))?;
        Ok(())
    }
}
