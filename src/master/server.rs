//! Master process wiring

use crate::common::{MasterConfig, Result};
use crate::master::background::spawn_background;
use crate::master::chunkserver_client::HttpChunkServerClient;
use crate::master::coordinator::Coordinator;
use crate::master::http::create_router;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct MasterServer {
    config: MasterConfig,
}

impl MasterServer {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting master");
        tracing::info!("  RPC API: {}", self.config.bind_addr);
        tracing::info!("  Replicas: {}", self.config.replicas);
        tracing::info!(
            "  Server timeout: {}ms, lease: {}ms, cycle: {}ms",
            self.config.server_timeout_ms,
            self.config.lease_timeout_ms,
            self.config.background_interval_ms
        );

        let client = HttpChunkServerClient::new(self.config.downstream_timeout())?;
        let coordinator = Arc::new(Coordinator::new(self.config.clone(), client));

        // Failing to bind is the only fatal error
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let background = spawn_background(coordinator.clone());
        let router = create_router(coordinator);

        tracing::info!("✓ Master ready on {}", local_addr);
        let res = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        background.abort();
        tracing::info!("Master stopped");
        res.map_err(Into::into)
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!("Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
