//! Constants for ORDERLINE API
//!
//! Defaults for the HTTP server, the Postgres pool and the durable queue.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

/// Upper bound on the store check made by /health/ready
pub const DEFAULT_READY_STORE_CHECK_TIMEOUT_MS: u64 = 2_000;

// ============================================================================
// DATABASE
// ============================================================================

/// Default PostgreSQL host
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default PostgreSQL port
pub const DEFAULT_DB_PORT: u16 = 5433;

/// Default database name
pub const DEFAULT_DB_NAME: &str = "wborders";

/// Default database user
pub const DEFAULT_DB_USER: &str = "wbuser";

/// Default maximum pool size
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Default pool wait timeout in seconds
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// DURABLE QUEUE
// ============================================================================

/// Default redelivery delay for unacknowledged messages (10 seconds)
pub const DEFAULT_QUEUE_ACK_WAIT_MS: u64 = 10_000;

/// Default poll interval when the queue is empty
pub const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 250;
