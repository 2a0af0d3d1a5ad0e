//! ORDERLINE API - Postgres Adapters and HTTP Read Surface
//!
//! Binds the ingestion core to real infrastructure:
//! - [`DbClient`] is the Postgres record store
//! - [`PgMessageQueue`] is a durable at-least-once queue in Postgres
//! - [`routes`] serves orders from the read cache over HTTP

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
mod macros;
pub mod queue;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::ServerConfig;
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use queue::{DeadLetterRecord, PgMessageQueue, QueueConfig};
pub use routes::create_api_router;
pub use shutdown::{propagate_shutdown, shutdown_signal};
pub use state::AppState;
pub use telemetry::{init_tracing, TelemetryConfig};
