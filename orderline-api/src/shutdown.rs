//! Process shutdown.
//!
//! The HTTP server and the ingestion subscriber stop on the same signal. The
//! stop request reaches the subscriber as soon as the signal arrives, so both
//! drain side by side instead of one after the other.

use std::future::Future;

use tokio::sync::watch;

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
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
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Wait for `signal`, then tell ingestion to stop.
///
/// Meant to be handed to `with_graceful_shutdown`, so the server starts
/// draining at the same moment.
pub async fn propagate_shutdown(
    signal: impl Future<Output = ()>,
    shutdown_tx: watch::Sender<bool>,
) {
    signal.await;
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Ingestion already stopped");
    }
}
