//! Ingestion configuration.

use std::time::Duration;

use crate::constants::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_MAX_DELIVERIES, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_PROCESSING_TIMEOUT_MS, DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_SOURCE_RETRY_DELAY_MS,
    DEFAULT_STORE_TIMEOUT_MS,
};

/// Tuning for the ingestion pipeline and its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Deadline for persisting one order.
    pub store_timeout: Duration,

    /// Deadline for one processing attempt (decode through cache update).
    pub processing_timeout: Duration,

    /// Deadline for acknowledging a processed delivery.
    pub ack_timeout: Duration,

    /// Maximum deliveries handled at once.
    pub max_in_flight: usize,

    /// Delivery attempt from which malformed messages are dead-lettered
    /// instead of redelivered. `0` means redeliver forever.
    pub max_deliveries: u32,

    /// How long in-flight handlers may run after shutdown before they are
    /// abandoned to broker redelivery.
    pub shutdown_grace: Duration,

    /// Pause after the message source itself reports an error.
    pub source_retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            processing_timeout: Duration::from_millis(DEFAULT_PROCESSING_TIMEOUT_MS),
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            source_retry_delay: Duration::from_millis(DEFAULT_SOURCE_RETRY_DELAY_MS),
        }
    }
}

impl IngestConfig {
    /// Create IngestConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `ORDERLINE_STORE_TIMEOUT_MS` (default: 3000)
    /// - `ORDERLINE_PROCESSING_TIMEOUT_MS` (default: 5000)
    /// - `ORDERLINE_ACK_TIMEOUT_MS` (default: 10000)
    /// - `ORDERLINE_MAX_IN_FLIGHT` (default: 32)
    /// - `ORDERLINE_MAX_DELIVERIES` (default: 16, 0 disables dead-lettering)
    /// - `ORDERLINE_SHUTDOWN_GRACE_MS` (default: 5000)
    /// - `ORDERLINE_SOURCE_RETRY_DELAY_MS` (default: 1000)
    pub fn from_env() -> Self {
        Self {
            store_timeout: env_millis("ORDERLINE_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS),
            processing_timeout: env_millis(
                "ORDERLINE_PROCESSING_TIMEOUT_MS",
                DEFAULT_PROCESSING_TIMEOUT_MS,
            ),
            ack_timeout: env_millis("ORDERLINE_ACK_TIMEOUT_MS", DEFAULT_ACK_TIMEOUT_MS),
            max_in_flight: std::env::var("ORDERLINE_MAX_IN_FLIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            max_deliveries: std::env::var("ORDERLINE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_DELIVERIES),
            shutdown_grace: env_millis("ORDERLINE_SHUTDOWN_GRACE_MS", DEFAULT_SHUTDOWN_GRACE_MS),
            source_retry_delay: env_millis(
                "ORDERLINE_SOURCE_RETRY_DELAY_MS",
                DEFAULT_SOURCE_RETRY_DELAY_MS,
            ),
        }
    }

    /// Whether a message that failed permanently on `attempt` should be
    /// dead-lettered rather than left for redelivery.
    pub fn should_dead_letter(&self, attempt: u32) -> bool {
        self.max_deliveries > 0 && attempt >= self.max_deliveries
    }
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}
