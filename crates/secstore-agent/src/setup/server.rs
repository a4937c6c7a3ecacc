//! Server startup and graceful shutdown

use crate::state::AppState;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;

/// Start the server with graceful shutdown
pub async fn start_server(state: Arc<AppState>, app: Router) -> Result<()> {
    let config = &state.config;
    let addr = format!("0.0.0.0:{}", config.server_port());
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        mount_root = %config.mount_root().display(),
        max_upload_size_gb = config.max_upload_size_gb(),
        max_download_size_gb = config.max_download_size_gb(),
        workers = config.worker_pool_size(),
        public_download_dir = %config.public_download_dir().display(),
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.dispatcher.shutdown().await;
    tracing::info!("Worker pool stopped");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
