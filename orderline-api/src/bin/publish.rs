//! ORDERLINE Publisher
//!
//! Reads one JSON order document from stdin and appends it to the durable
//! queue.
//!
//! ```text
//! orderline-publish < model.json
//! ```

use orderline_api::{
    init_tracing, ApiError, ApiResult, DbClient, DbConfig, PgMessageQueue, QueueConfig,
    TelemetryConfig,
};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::from_env())?;

    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .map_err(|e| ApiError::invalid_input(format!("Failed to read stdin: {}", e)))?;

    let document: serde_json::Value = serde_json::from_slice(&input)?;
    if !document.is_object() {
        return Err(ApiError::invalid_input("Expected a JSON object"));
    }
    let payload = serde_json::to_vec(&document)?;

    let db = DbClient::from_config(&DbConfig::from_env())?;
    db.ensure_schema().await?;
    let queue = PgMessageQueue::new(db, QueueConfig::from_env());
    let message_id = queue.publish(&payload).await?;

    tracing::info!(
        message_id,
        bytes = payload.len(),
        order_uid = document.get("order_uid").and_then(|v| v.as_str()).unwrap_or_default(),
        "Published order"
    );
    Ok(())
}
