//! ORDERLINE Server Entry Point
//!
//! Warms the read cache from Postgres, starts the durable-queue subscriber
//! and serves orders over HTTP until Ctrl-C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use orderline_core::{MessageSource, OrderCache, RecordStore};
use orderline_ingest::{
    GetOrderById, IngestConfig, LoadCache, ProcessIncomingOrder, Readiness, Subscriber,
};
use orderline_storage::MemoryOrderCache;

use orderline_api::{
    create_api_router, init_tracing, propagate_shutdown, shutdown_signal, ApiError, ApiResult,
    AppState, DbClient, DbConfig, PgMessageQueue, QueueConfig, ServerConfig, TelemetryConfig,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracing(&telemetry_config)?;

    let db_config = DbConfig::from_env();
    let server_config = ServerConfig::from_env();
    let ingest_config = IngestConfig::from_env();
    let queue_config = QueueConfig::from_env();

    let db = DbClient::from_config(&db_config)?;
    db.ensure_schema().await?;

    let store: Arc<dyn RecordStore> = Arc::new(db.clone());
    let cache: Arc<dyn OrderCache> = Arc::new(MemoryOrderCache::new());
    let readiness = Readiness::new();

    // A partial cache must never be served, so a failed warm-load ends the process.
    let report = LoadCache::new(store.clone(), cache.clone())
        .execute_and_mark_ready(&readiness)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Cache warm-load failed"))?;
    tracing::info!(
        loaded = report.loaded,
        skipped = report.skipped,
        "Read cache ready"
    );

    let pipeline = ProcessIncomingOrder::new(store.clone(), cache.clone(), ingest_config.store_timeout);
    let subscriber = Subscriber::new(pipeline, ingest_config.clone());
    let source: Arc<dyn MessageSource> = Arc::new(PgMessageQueue::new(db.clone(), queue_config));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let ingest = tokio::spawn(async move { subscriber.run(source, shutdown_rx).await });

    let state = AppState::new(GetOrderById::new(cache), readiness, store);
    let app: Router = create_api_router(state, &server_config);

    let addr = server_config.socket_addr()?;
    tracing::info!(%addr, "Starting ORDERLINE server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let mut stop_rx = shutdown_tx.subscribe();
    let server = async {
        axum::serve(listener, app)
            .with_graceful_shutdown(propagate_shutdown(shutdown_signal(), shutdown_tx))
            .await
            .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))
    };

    let grace = ingest_config.shutdown_grace;
    let ingestion = async move {
        // A dropped sender means the server is gone; stop ingestion as well.
        let _ = stop_rx.wait_for(|stop| *stop).await;
        let wait = grace + Duration::from_secs(1);
        match tokio::time::timeout(wait, ingest).await {
            Ok(Ok(snapshot)) => tracing::info!(
                received = snapshot.received,
                acked = snapshot.acked,
                failures = snapshot.failures(),
                dead_lettered = snapshot.dead_lettered,
                "Ingestion stopped"
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "Ingestion task failed"),
            Err(_) => {
                tracing::warn!(wait_ms = wait.as_millis() as u64, "Ingestion did not stop in time")
            }
        }
    };

    let (served, ()) = tokio::join!(server, ingestion);
    served
}
