//! Rebuild the read cache from the record store at startup.

use std::sync::Arc;

use orderline_core::{Order, OrderCache, RecordStore, WarmLoadError};

use crate::readiness::Readiness;

/// Outcome of a completed warm-load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmLoadReport {
    /// Records decoded and written to the cache.
    pub loaded: u64,
    /// Records skipped because their payload did not decode.
    pub skipped: u64,
}

/// Streams every stored record into the cache.
///
/// A record that fails to decode is skipped and the load carries on. Only a
/// failure of the store stream itself aborts the load.
#[derive(Clone)]
pub struct LoadCache {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn OrderCache>,
}

impl LoadCache {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<dyn OrderCache>) -> Self {
        Self { store, cache }
    }

    pub async fn execute(&self) -> Result<WarmLoadReport, WarmLoadError> {
        let mut report = WarmLoadReport::default();
        let cache = &self.cache;

        self.store
            .load_all(&mut |record| {
                match Order::decode(&record.payload) {
                    Ok(order) => {
                        cache.set(&record.order_uid, order);
                        report.loaded += 1;
                    }
                    Err(err) => {
                        report.skipped += 1;
                        tracing::warn!(
                            order_uid = %record.order_uid,
                            error = %err,
                            "Skipping undecodable stored order"
                        );
                    }
                }
                Ok(())
            })
            .await?;

        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped,
            "Cache warm-load complete"
        );
        Ok(report)
    }

    /// Run the warm-load and flip `readiness` only if it succeeded.
    pub async fn execute_and_mark_ready(
        &self,
        readiness: &Readiness,
    ) -> Result<WarmLoadReport, WarmLoadError> {
        let report = self.execute().await?;
        readiness.mark_ready();
        Ok(report)
    }
}
