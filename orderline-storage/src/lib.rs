//! ORDERLINE Storage - Read Cache and In-Memory Record Store
//!
//! The read cache is the only mutable state shared between ingestion, warm-load
//! and the read path. The in-memory record store backs tests and local
//! development; the Postgres store lives in orderline-api.

pub mod cache;
pub mod memory_store;

pub use cache::{CacheStats, MemoryOrderCache};
pub use memory_store::MemoryRecordStore;
