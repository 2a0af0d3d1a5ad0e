//! ORDERLINE Ingest - Consistency and Recovery Protocol
//!
//! Binds the durable message source, the record store and the read cache:
//!
//! - [`ProcessIncomingOrder`]: decode, validate, persist, then update the cache
//! - [`Subscriber`]: drives the pipeline from a [`MessageSource`] and settles
//!   every delivery with the broker
//! - [`LoadCache`]: rebuilds the cache from the store before reads are served
//! - [`GetOrderById`]: the cache-only read path
//!
//! [`MessageSource`]: orderline_core::MessageSource

pub mod broker;
pub mod config;
pub mod constants;
pub mod metrics;
pub mod pipeline;
pub mod read;
pub mod readiness;
pub mod subscriber;
pub mod warm_load;

pub use broker::{DeadLetter, MemoryBroker};
pub use config::IngestConfig;
pub use metrics::{IngestMetrics, IngestMetricsSnapshot};
pub use pipeline::ProcessIncomingOrder;
pub use read::GetOrderById;
pub use readiness::Readiness;
pub use subscriber::{DeliveryOutcome, Subscriber};
pub use warm_load::{LoadCache, WarmLoadReport};
