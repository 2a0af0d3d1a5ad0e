//! In-memory record store for tests and local development.
//!
//! Behaves like the Postgres store: raw bytes are kept exactly as written,
//! `upsert` fully replaces, and `load_all` walks records in key order. Fault
//! injection hooks let tests take the store offline or slow it down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use orderline_core::{RecordStore, RecordVisitor, StoreError, StoreResult, StoredRecord};

/// In-memory [`RecordStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
    upsert_delay: Arc<Mutex<Option<Duration>>>,
    upsert_calls: Arc<AtomicU64>,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing validation. Used to plant corrupt rows.
    pub fn insert_raw(&self, order_uid: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order_uid.into(), payload.into());
    }

    /// Raw payload stored for `order_uid`.
    pub fn get_raw(&self, order_uid: &str) -> Option<Vec<u8>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(order_uid)
            .cloned()
    }

    /// Get count of stored records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `upsert` calls received, successful or not.
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Make every operation fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every `upsert` by `delay` before it takes effect.
    pub fn set_upsert_delay(&self, delay: Option<Duration>) {
        *self
            .upsert_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "memory store taken offline".to_string(),
            });
        }
        Ok(())
    }

    fn snapshot_keys(&self) -> Vec<String> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, order_uid: &str, raw: &[u8]) -> StoreResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .upsert_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.check_available()?;
        self.insert_raw(order_uid, raw);
        tracing::trace!(order_uid, bytes = raw.len(), "memory store upsert");
        Ok(())
    }

    async fn load_all(&self, visit: &mut RecordVisitor<'_>) -> StoreResult<()> {
        self.check_available()?;

        // Walk by key and fetch each payload separately so the visitor never
        // runs under the store lock.
        for order_uid in self.snapshot_keys() {
            let Some(payload) = self.get_raw(&order_uid) else {
                continue;
            };
            visit(StoredRecord { order_uid, payload })?;
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.check_available()
    }
}
