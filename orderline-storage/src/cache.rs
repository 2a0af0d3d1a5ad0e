//! Process-wide read cache.
//!
//! A single `RwLock` guards the map: lookups share the read lock and never
//! block each other, while `set` takes the write lock for the duration of one
//! map insert. Values are `Arc<Order>` snapshots, so replacing an entry swaps
//! a pointer and readers holding the previous snapshot keep a complete order.
//!
//! There is no eviction. Entries live for the lifetime of the process and the
//! whole cache can be rebuilt from the record store at any time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use orderline_core::{Order, OrderCache};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found an entry.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of inserts and replacements.
    pub writes: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory [`OrderCache`] keyed by `order_uid`.
#[derive(Debug, Default)]
pub struct MemoryOrderCache {
    entries: RwLock<HashMap<String, Arc<Order>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl MemoryOrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }

    /// Identifiers of every cached order, unordered.
    pub fn keys(&self) -> Vec<String> {
        // A panicking writer cannot leave a half-applied insert behind, so a
        // poisoned lock still guards a consistent map.
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }
}

impl OrderCache for MemoryOrderCache {
    fn get(&self, order_uid: &str) -> Option<Arc<Order>> {
        let found = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(order_uid).cloned()
        };

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn set(&self, order_uid: &str, order: Order) {
        let order = Arc::new(order);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(order_uid.to_string(), order);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }
}
