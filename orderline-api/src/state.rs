//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use orderline_core::RecordStore;
use orderline_ingest::{GetOrderById, Readiness};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Cache-only point lookups.
    pub orders: GetOrderById,
    /// Flipped once the cache warm-load has completed.
    pub readiness: Readiness,
    /// Checked by the readiness endpoint; never used to serve reads.
    pub store: Arc<dyn RecordStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orders: GetOrderById, readiness: Readiness, store: Arc<dyn RecordStore>) -> Self {
        Self {
            orders,
            readiness,
            store,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(GetOrderById, orders);
crate::impl_from_ref!(Readiness, readiness);
crate::impl_from_ref!(Arc<dyn RecordStore>, store);
crate::impl_from_ref!(Instant, start_time);
