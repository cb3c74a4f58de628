//! HTTP Server implementation

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use redraft_api::{create_router, AppState};
use redraft_core::ServerConfig;

pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.config.address();
        let shutdown = CancellationToken::new();

        let health_task = self.state.health.start(shutdown.clone());
        let app = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(addr.as_str())
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;

        info!(address = %addr, "HTTP server listening");

        let served = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error");

        shutdown.cancel();
        if let Err(e) = health_task.await {
            warn!(error = %e, "Health monitor task ended abnormally");
        }

        served
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
