//! Postgres-backed Durable Message Queue
//!
//! A durable subscription with manual acknowledgement on top of the
//! `order_messages` table:
//!
//! - `next` claims the oldest visible row with `FOR UPDATE SKIP LOCKED`, bumps
//!   its attempt counter and hides it for `ack_wait`
//! - a row that is not acknowledged in time becomes visible again and is
//!   redelivered
//! - `ack` deletes the row; `dead_letter` moves it to `order_dead_letters`
//!
//! Several consumers may share the table; each row is claimed by one of them
//! at a time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderline_core::{Acknowledger, Delivery, MessageSource, SourceError, SourceResult};

use crate::constants::{DEFAULT_QUEUE_ACK_WAIT_MS, DEFAULT_QUEUE_POLL_INTERVAL_MS};
use crate::db::DbClient;
use crate::error::{ApiError, ApiResult};

const CLAIM_SQL: &str = r#"
UPDATE order_messages
SET attempts = attempts + 1,
    visible_at = now() + make_interval(secs => $1)
WHERE id = (
    SELECT id FROM order_messages
    WHERE visible_at <= now()
    ORDER BY id
    FOR UPDATE SKIP LOCKED
    LIMIT 1
)
RETURNING id, payload, attempts
"#;

const DEAD_LETTER_SQL: &str = r#"
WITH moved AS (
    DELETE FROM order_messages WHERE id = $1
    RETURNING id, payload, attempts, published_at
)
INSERT INTO order_dead_letters (id, payload, attempts, reason, published_at)
SELECT id, payload, attempts, $2, published_at FROM moved
"#;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the durable queue consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a claimed message stays hidden before it is redelivered
    /// (default: 10 seconds)
    pub ack_wait: Duration,

    /// Pause between claims while the queue is empty (default: 250 ms)
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_millis(DEFAULT_QUEUE_ACK_WAIT_MS),
            poll_interval: Duration::from_millis(DEFAULT_QUEUE_POLL_INTERVAL_MS),
        }
    }
}

impl QueueConfig {
    /// Create QueueConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `ORDERLINE_QUEUE_ACK_WAIT_MS` (default: 10000)
    /// - `ORDERLINE_QUEUE_POLL_INTERVAL_MS` (default: 250)
    pub fn from_env() -> Self {
        let ack_wait = Duration::from_millis(
            std::env::var("ORDERLINE_QUEUE_ACK_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_QUEUE_ACK_WAIT_MS),
        );

        let poll_interval = Duration::from_millis(
            std::env::var("ORDERLINE_QUEUE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms: &u64| *ms > 0)
                .unwrap_or(DEFAULT_QUEUE_POLL_INTERVAL_MS),
        );

        Self {
            ack_wait,
            poll_interval,
        }
    }
}

// ============================================================================
// QUEUE
// ============================================================================

/// A message parked on the dead-letter table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub message_id: i64,
    pub payload: Vec<u8>,
    pub attempts: i32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Durable queue of raw order payloads stored in Postgres.
#[derive(Clone)]
pub struct PgMessageQueue {
    db: DbClient,
    config: QueueConfig,
}

impl PgMessageQueue {
    pub fn new(db: DbClient, config: QueueConfig) -> Self {
        Self { db, config }
    }

    /// Append a message and return its id.
    pub async fn publish(&self, payload: &[u8]) -> ApiResult<i64> {
        let conn = self.db.get_conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO order_messages (payload) VALUES ($1) RETURNING id",
                &[&payload],
            )
            .await?;
        let id: i64 = row.try_get(0)?;
        tracing::debug!(message_id = id, bytes = payload.len(), "Message published");
        Ok(id)
    }

    /// Messages not yet acknowledged or dead-lettered.
    pub async fn pending_count(&self) -> ApiResult<i64> {
        let conn = self.db.get_conn().await?;
        let row = conn
            .query_one("SELECT count(*) FROM order_messages", &[])
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Dead-lettered messages, oldest first.
    pub async fn dead_letters(&self, limit: i64) -> ApiResult<Vec<DeadLetterRecord>> {
        let conn = self.db.get_conn().await?;
        let rows = conn
            .query(
                "SELECT id, payload, attempts, reason, dead_lettered_at \
                 FROM order_dead_letters ORDER BY dead_lettered_at, id LIMIT $1",
                &[&limit],
            )
            .await?;

        let records = rows
            .iter()
            .map(|row| {
                Ok(DeadLetterRecord {
                    message_id: row.try_get(0)?,
                    payload: row.try_get(1)?,
                    attempts: row.try_get(2)?,
                    reason: row.try_get(3)?,
                    dead_lettered_at: row.try_get(4)?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;
        Ok(records)
    }

    /// Claim the oldest visible message, if any.
    async fn claim(&self) -> SourceResult<Option<Delivery>> {
        let conn = self.db.get_conn().await.map_err(unavailable)?;
        let ack_wait_secs = self.config.ack_wait.as_secs_f64();
        let row = conn
            .query_opt(CLAIM_SQL, &[&ack_wait_secs])
            .await
            .map_err(source_unavailable)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get(0).map_err(source_unavailable)?;
        let payload: Vec<u8> = row.try_get(1).map_err(source_unavailable)?;
        let attempts: i32 = row.try_get(2).map_err(source_unavailable)?;
        Ok(Some(Delivery::new(
            id.to_string(),
            u32::try_from(attempts).unwrap_or(1),
            payload,
            Box::new(PgAcker {
                db: self.db.clone(),
                message_id: id,
            }),
        )))
    }
}

#[async_trait]
impl MessageSource for PgMessageQueue {
    /// Waits until a message is visible. The table never closes, so this
    /// only returns `None` if the caller drops the future.
    async fn next(&self) -> SourceResult<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.claim().await? {
                return Ok(Some(delivery));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

fn unavailable(err: ApiError) -> SourceError {
    SourceError::Unavailable {
        reason: err.message,
    }
}

fn source_unavailable(err: tokio_postgres::Error) -> SourceError {
    SourceError::Unavailable {
        reason: err.to_string(),
    }
}

struct PgAcker {
    db: DbClient,
    message_id: i64,
}

#[async_trait]
impl Acknowledger for PgAcker {
    async fn ack(&self) -> SourceResult<()> {
        let ack_failed = |reason: String| SourceError::AckFailed {
            message_id: self.message_id.to_string(),
            reason,
        };

        let conn = self.db.get_conn().await.map_err(|e| ack_failed(e.message))?;
        // Zero rows means another delivery of the same message already
        // acknowledged it.
        conn.execute(
            "DELETE FROM order_messages WHERE id = $1",
            &[&self.message_id],
        )
        .await
        .map_err(|e| ack_failed(e.to_string()))?;
        Ok(())
    }

    async fn dead_letter(&self, reason: &str) -> SourceResult<()> {
        let dead_letter_failed = |reason: String| SourceError::DeadLetterFailed {
            message_id: self.message_id.to_string(),
            reason,
        };

        let conn = self
            .db
            .get_conn()
            .await
            .map_err(|e| dead_letter_failed(e.message))?;
        let moved = conn
            .execute(DEAD_LETTER_SQL, &[&self.message_id, &reason])
            .await
            .map_err(|e| dead_letter_failed(e.to_string()))?;

        if moved == 0 {
            return Err(dead_letter_failed(
                "message is no longer pending".to_string(),
            ));
        }
        Ok(())
    }
}
