//! Ports between the consistency protocol and its collaborators.
//!
//! The protocol only ever talks to three roles: a [`RecordStore`] holding the
//! authoritative raw payloads, an [`OrderCache`] holding the decoded read
//! view, and a [`MessageSource`] delivering raw payloads at least once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{SourceResult, StoreResult};
use crate::order::Order;

// ============================================================================
// RECORD STORE
// ============================================================================

/// A persisted record exactly as stored: identity plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub order_uid: String,
    pub payload: Vec<u8>,
}

/// Visitor fed one record at a time by [`RecordStore::load_all`].
///
/// Returning an error aborts the stream; the error is handed back to the
/// caller of `load_all`.
pub type RecordVisitor<'a> = dyn FnMut(StoredRecord) -> StoreResult<()> + Send + 'a;

/// Durable key-value persistence for raw order payloads.
///
/// Implementations never retry internally: every failure is surfaced to the
/// caller, which owns the retry policy.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write `raw` for `order_uid`, fully replacing any previous payload.
    ///
    /// Must be idempotent: repeating the call with the same input leaves the
    /// same stored state as a single call.
    async fn upsert(&self, order_uid: &str, raw: &[u8]) -> StoreResult<()>;

    /// Stream every stored record to `visit` without materialising the table.
    async fn load_all(&self, visit: &mut RecordVisitor<'_>) -> StoreResult<()>;

    /// Check that the store can currently serve requests.
    async fn health_check(&self) -> StoreResult<()>;
}

// ============================================================================
// READ CACHE
// ============================================================================

/// Concurrent in-memory projection of the record store.
///
/// `get` never performs I/O. Entries are shared immutable snapshots, so a
/// reader observes either the previous or the next order for a key, never a
/// mix of both.
pub trait OrderCache: Send + Sync {
    /// Look up the decoded order for `order_uid`.
    fn get(&self, order_uid: &str) -> Option<Arc<Order>>;

    /// Insert or fully replace the entry for `order_uid`.
    fn set(&self, order_uid: &str, order: Order);

    /// Number of cached orders.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// MESSAGE SOURCE
// ============================================================================

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirm the delivery so the broker stops redelivering it.
    async fn ack(&self) -> SourceResult<()>;

    /// Remove the delivery from redelivery and park it on the broker's
    /// dead-letter side channel together with `reason`.
    async fn dead_letter(&self, reason: &str) -> SourceResult<()>;
}

/// One delivery of a raw message.
///
/// The same payload may arrive more than once; `attempt` counts deliveries of
/// this message starting at 1.
pub struct Delivery {
    message_id: String,
    attempt: u32,
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        message_id: impl Into<String>,
        attempt: u32,
        payload: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            attempt,
            payload,
            acker,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn ack(&self) -> SourceResult<()> {
        self.acker.ack().await
    }

    pub async fn dead_letter(&self, reason: &str) -> SourceResult<()> {
        self.acker.dead_letter(reason).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("attempt", &self.attempt)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Durable, at-least-once subscription.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next delivery. `Ok(None)` means the source is closed.
    async fn next(&self) -> SourceResult<Option<Delivery>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingAcker {
        acks: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Acknowledger for CountingAcker {
        async fn ack(&self) -> SourceResult<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn dead_letter(&self, _reason: &str) -> SourceResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivery_delegates_ack() {
        let acks = Arc::new(AtomicU32::new(0));
        let delivery = Delivery::new(
            "m-1",
            2,
            b"{}".to_vec(),
            Box::new(CountingAcker { acks: acks.clone() }),
        );

        assert_eq!(delivery.message_id(), "m-1");
        assert_eq!(delivery.attempt(), 2);
        assert_eq!(delivery.payload(), b"{}");

        delivery.ack().await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_debug_hides_payload() {
        let delivery = Delivery::new("m-1", 1, vec![0; 42], Box::<CountingAcker>::default());
        let debug = format!("{:?}", delivery);
        assert!(debug.contains("payload_len: 42"));
        assert!(debug.contains("m-1"));
    }
}
