//! In-process durable message source.
//!
//! Mirrors the delivery contract of a durable subscription with manual
//! acknowledgement: a delivered message stays owned by the broker until it is
//! acknowledged, and comes back with a higher attempt counter once its ack
//! deadline passes. Used by tests and by local runs without an external
//! broker.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use orderline_core::{Acknowledger, Delivery, MessageSource, SourceError, SourceResult};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::constants::DEFAULT_ACK_WAIT_MS;

/// A message parked on the dead-letter side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: u64,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    payload: Vec<u8>,
    attempts: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_id: u64,
    ready: VecDeque<StoredMessage>,
    in_flight: BTreeMap<u64, (StoredMessage, Instant)>,
    dead_letters: Vec<DeadLetter>,
    acked: u64,
    closed: bool,
}

impl BrokerState {
    /// Move every in-flight message whose deadline passed back to the queue.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((message, _)) = self.in_flight.remove(&id) {
                tracing::debug!(message_id = id, attempts = message.attempts, "Ack deadline expired, redelivering");
                self.ready.push_back(message);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|(_, deadline)| *deadline).min()
    }

    /// Take a message out of the broker wherever it currently sits.
    fn take(&mut self, id: u64) -> Option<StoredMessage> {
        if let Some((message, _)) = self.in_flight.remove(&id) {
            return Some(message);
        }
        let position = self.ready.iter().position(|m| m.id == id)?;
        self.ready.remove(position)
    }
}

#[derive(Debug)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    notify: Notify,
    ack_wait: Duration,
    fail_acks: AtomicBool,
}

impl BrokerInner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory at-least-once broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_ACK_WAIT_MS))
    }
}

impl MemoryBroker {
    /// Create a broker that redelivers messages not acknowledged within `ack_wait`.
    pub fn new(ack_wait: Duration) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                ack_wait,
                fail_acks: AtomicBool::new(false),
            }),
        }
    }

    /// Append a message and return its id.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> u64 {
        let id = {
            let mut state = self.inner.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.ready.push_back(StoredMessage {
                id,
                payload: payload.into(),
                attempts: 0,
            });
            id
        };
        self.inner.notify.notify_waiters();
        id
    }

    /// Redeliver every in-flight message right away, as if all ack deadlines
    /// had just expired.
    pub fn redeliver_all(&self) {
        {
            let mut state = self.inner.lock();
            let in_flight = std::mem::take(&mut state.in_flight);
            for (_, (message, _)) in in_flight {
                state.ready.push_back(message);
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Stop handing out deliveries. Undelivered and unacknowledged messages
    /// stay in the broker.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.notify.notify_waiters();
    }

    /// Make every acknowledgement fail, as if the broker connection dropped
    /// between processing and ack.
    pub fn set_fail_acks(&self, fail: bool) {
        self.inner.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Messages not yet acknowledged or dead-lettered.
    pub fn pending(&self) -> usize {
        let state = self.inner.lock();
        state.ready.len() + state.in_flight.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn acked(&self) -> u64 {
        self.inner.lock().acked
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().dead_letters.clone()
    }

    fn try_deliver(&self) -> Result<Option<Delivery>, Option<Instant>> {
        let mut state = self.inner.lock();
        if state.closed {
            return Ok(None);
        }

        let now = Instant::now();
        state.requeue_expired(now);

        match state.ready.pop_front() {
            Some(mut message) => {
                message.attempts += 1;
                let delivery = Delivery::new(
                    message.id.to_string(),
                    message.attempts,
                    message.payload.clone(),
                    Box::new(MemoryAcker {
                        inner: self.inner.clone(),
                        message_id: message.id,
                    }),
                );
                state
                    .in_flight
                    .insert(message.id, (message, now + self.inner.ack_wait));
                Ok(Some(delivery))
            }
            None => Err(state.next_deadline()),
        }
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn next(&self) -> SourceResult<Option<Delivery>> {
        loop {
            // Register interest before inspecting state so a publish racing
            // with this check still wakes us.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_deliver() {
                Ok(delivery) => return Ok(delivery),
                Err(Some(deadline)) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Err(None) => notified.await,
            }
        }
    }
}

struct MemoryAcker {
    inner: Arc<BrokerInner>,
    message_id: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> SourceResult<()> {
        if self.inner.fail_acks.load(Ordering::SeqCst) {
            return Err(SourceError::AckFailed {
                message_id: self.message_id.to_string(),
                reason: "broker connection lost".to_string(),
            });
        }

        let mut state = self.inner.lock();
        // A second ack for a message that was redelivered and already
        // acknowledged through another delivery is a no-op.
        if state.take(self.message_id).is_some() {
            state.acked += 1;
        }
        Ok(())
    }

    async fn dead_letter(&self, reason: &str) -> SourceResult<()> {
        let mut state = self.inner.lock();
        let message = state
            .take(self.message_id)
            .ok_or_else(|| SourceError::DeadLetterFailed {
                message_id: self.message_id.to_string(),
                reason: "message is no longer pending".to_string(),
            })?;
        state.dead_letters.push(DeadLetter {
            message_id: message.id,
            payload: message.payload,
            attempts: message.attempts,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_now(broker: &MemoryBroker) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), broker.next())
            .await
            .expect("delivery should be ready")
            .expect("source should not fail")
            .expect("source should not be closed")
    }

    #[tokio::test]
    async fn test_publish_deliver_ack() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        broker.publish(b"hello".to_vec());

        let delivery = next_now(&broker).await;
        assert_eq!(delivery.payload(), b"hello");
        assert_eq!(delivery.attempt(), 1);
        assert_eq!(broker.in_flight(), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.pending(), 0);
        assert_eq!(broker.acked(), 1);
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered_after_deadline() {
        let broker = MemoryBroker::new(Duration::from_millis(30));
        broker.publish(b"m".to_vec());

        let first = next_now(&broker).await;
        assert_eq!(first.attempt(), 1);

        let second = next_now(&broker).await;
        assert_eq!(second.attempt(), 2);
        assert_eq!(second.message_id(), first.message_id());
    }

    #[tokio::test]
    async fn test_redeliver_all_on_demand() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        broker.publish(b"a".to_vec());
        broker.publish(b"b".to_vec());
        let _a = next_now(&broker).await;
        let _b = next_now(&broker).await;
        assert_eq!(broker.in_flight(), 2);

        broker.redeliver_all();

        let again = next_now(&broker).await;
        assert_eq!(again.attempt(), 2);
        assert_eq!(again.payload(), b"a");
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_publish() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        let consumer = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.next().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.publish(b"late".to_vec());

        let delivery = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload(), b"late");
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        broker.publish(b"left behind".to_vec());
        broker.close();

        assert!(broker.next().await.unwrap().is_none());
        assert_eq!(broker.pending(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_removes_message() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        broker.publish(b"poison".to_vec());
        let delivery = next_now(&broker).await;

        delivery.dead_letter("malformed").await.unwrap();

        assert_eq!(broker.pending(), 0);
        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, b"poison".to_vec());
        assert_eq!(dead[0].reason, "malformed");
        assert!(delivery.dead_letter("again").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_ack_keeps_message_pending() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        broker.publish(b"m".to_vec());
        broker.set_fail_acks(true);

        let delivery = next_now(&broker).await;
        assert!(delivery.ack().await.is_err());
        assert_eq!(broker.pending(), 1);

        broker.set_fail_acks(false);
        broker.redeliver_all();
        let again = next_now(&broker).await;
        again.ack().await.unwrap();
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_ack_counts_once() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        broker.publish(b"m".to_vec());
        let first = next_now(&broker).await;
        broker.redeliver_all();
        let second = next_now(&broker).await;

        first.ack().await.unwrap();
        second.ack().await.unwrap();

        assert_eq!(broker.acked(), 1);
        assert_eq!(broker.pending(), 0);
    }
}
