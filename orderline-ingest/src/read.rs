//! Cache-only read path.

use std::sync::Arc;

use orderline_core::{Order, OrderCache};

/// Point lookup of an order. Never touches the store or the broker.
#[derive(Clone)]
pub struct GetOrderById {
    cache: Arc<dyn OrderCache>,
}

impl GetOrderById {
    pub fn new(cache: Arc<dyn OrderCache>) -> Self {
        Self { cache }
    }

    /// `None` is the normal "not found" answer, not an error.
    pub fn execute(&self, order_uid: &str) -> Option<Arc<Order>> {
        self.cache.get(order_uid)
    }

    /// Number of orders currently readable.
    pub fn cached_orders(&self) -> usize {
        self.cache.len()
    }
}
