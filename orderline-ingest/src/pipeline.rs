//! Processing of a single inbound message.
//!
//! Decode, validate, persist, then cache. The cache is only touched after the
//! store accepted the raw payload, so it never runs ahead of the store. Every
//! step either fully replaces prior state or fails without side effects on the
//! cache, which makes reprocessing a redelivered message safe.
//!
//! Messages for the same `order_uid` are persisted and cached one at a time,
//! so the cache always ends up holding the version the store kept last.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use orderline_core::{IngestError, IngestResult, Order, OrderCache, RecordStore};
use tokio::sync::Mutex as AsyncMutex;

/// One async lock per order identifier currently being processed.
#[derive(Default)]
struct OrderLocks {
    held: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OrderLocks {
    fn acquire(&self, order_uid: &str) -> Arc<AsyncMutex<()>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.entry(order_uid.to_string()).or_default().clone()
    }

    /// Drop the entry once no other task holds or awaits it.
    fn release(&self, order_uid: &str, handle: Arc<AsyncMutex<()>>) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&handle) == 2 {
            held.remove(order_uid);
        }
        drop(handle);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Persists an inbound order and publishes it to the read cache.
#[derive(Clone)]
pub struct ProcessIncomingOrder {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn OrderCache>,
    store_timeout: Duration,
    locks: Arc<OrderLocks>,
}

impl ProcessIncomingOrder {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn OrderCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            store_timeout,
            locks: Arc::new(OrderLocks::default()),
        }
    }

    /// Run one processing attempt for `raw` and return the order identifier.
    ///
    /// The store receives `raw` byte for byte; the cache receives the decoded
    /// order. On any error the cache is left untouched.
    pub async fn execute(&self, raw: &[u8]) -> IngestResult<String> {
        let order = Order::decode(raw)?;
        order.validate()?;

        let order_uid = order.order_uid.clone();
        let handle = self.locks.acquire(&order_uid);
        let result = {
            let _serialized = handle.lock().await;
            self.persist_and_cache(order, raw).await
        };
        self.locks.release(&order_uid, handle);
        result
    }

    async fn persist_and_cache(&self, order: Order, raw: &[u8]) -> IngestResult<String> {
        match tokio::time::timeout(self.store_timeout, self.store.upsert(&order.order_uid, raw))
            .await
        {
            Ok(persisted) => persisted?,
            Err(_) => {
                return Err(IngestError::Timeout {
                    operation: "upsert",
                    limit: self.store_timeout,
                })
            }
        }

        let order_uid = order.order_uid.clone();
        self.cache.set(&order_uid, order);
        tracing::debug!(order_uid = %order_uid, bytes = raw.len(), "order persisted and cached");
        Ok(order_uid)
    }
}
