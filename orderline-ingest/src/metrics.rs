//! Counters for ingestion activity.

use std::sync::atomic::{AtomicU64, Ordering};

use orderline_core::IngestError;

/// Ingestion counters, shared by every handler of a [`Subscriber`].
///
/// [`Subscriber`]: crate::Subscriber
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Deliveries pulled from the source
    pub received: AtomicU64,

    /// Deliveries that were persisted and cached
    pub processed: AtomicU64,

    pub decode_failures: AtomicU64,
    pub validation_failures: AtomicU64,
    pub store_failures: AtomicU64,
    pub timeouts: AtomicU64,

    /// Deliveries confirmed with the broker
    pub acked: AtomicU64,

    /// Processed deliveries whose acknowledgement failed or timed out
    pub ack_failures: AtomicU64,

    pub dead_lettered: AtomicU64,

    /// Errors returned by the message source itself
    pub source_errors: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, err: &IngestError) {
        let counter = match err {
            IngestError::Decode(_) => &self.decode_failures,
            IngestError::Validation(_) => &self.validation_failures,
            IngestError::Store(_) => &self.store_failures,
            IngestError::Timeout { .. } => &self.timeouts,
        };
        Self::incr(counter);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of ingestion metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestMetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub decode_failures: u64,
    pub validation_failures: u64,
    pub store_failures: u64,
    pub timeouts: u64,
    pub acked: u64,
    pub ack_failures: u64,
    pub dead_lettered: u64,
    pub source_errors: u64,
}

impl IngestMetricsSnapshot {
    /// Failed processing attempts of any kind.
    pub fn failures(&self) -> u64 {
        self.decode_failures + self.validation_failures + self.store_failures + self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderline_core::{DecodeError, StoreError};
    use std::time::Duration;

    #[test]
    fn test_record_failure_routes_by_kind() {
        let metrics = IngestMetrics::new();
        metrics.record_failure(&IngestError::from(DecodeError::Malformed {
            reason: "eof".to_string(),
        }));
        metrics.record_failure(&IngestError::from(StoreError::Unavailable {
            reason: "down".to_string(),
        }));
        metrics.record_failure(&IngestError::Timeout {
            operation: "upsert",
            limit: Duration::from_secs(3),
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.store_failures, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.validation_failures, 0);
        assert_eq!(snapshot.failures(), 3);
    }
}
