//! Durable subscription driver.
//!
//! Pulls deliveries from a [`MessageSource`], runs each through
//! [`ProcessIncomingOrder`] under a processing deadline and settles it with
//! the broker:
//!
//! - success: acknowledge, so the broker stops redelivering
//! - store failure or timeout: leave unacknowledged, the broker redelivers
//!   after its ack-wait
//! - malformed or invalid payload: leave unacknowledged until the configured
//!   delivery attempt, then dead-letter
//!
//! A message is never acknowledged unless its payload was durably stored and
//! the cache was updated.

use std::sync::Arc;

use orderline_core::{Delivery, IngestError, MessageSource};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::config::IngestConfig;
use crate::metrics::{IngestMetrics, IngestMetricsSnapshot};
use crate::pipeline::ProcessIncomingOrder;

/// How a single delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed and confirmed with the broker.
    Acknowledged,
    /// Processed, but the acknowledgement failed or timed out. The broker will
    /// redeliver and reprocessing is harmless.
    AckFailed,
    /// Not processed. Left for broker redelivery.
    RedeliverPending { reason: &'static str },
    /// Permanently failed and parked on the dead-letter channel.
    DeadLettered,
}

/// Drives the ingestion pipeline from a message source.
#[derive(Clone)]
pub struct Subscriber {
    pipeline: ProcessIncomingOrder,
    config: IngestConfig,
    metrics: Arc<IngestMetrics>,
}

impl Subscriber {
    pub fn new(pipeline: ProcessIncomingOrder, config: IngestConfig) -> Self {
        Self {
            pipeline,
            config,
            metrics: Arc::new(IngestMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        self.metrics.clone()
    }

    /// Consume `source` until shutdown is signalled or the source closes.
    ///
    /// At most `max_in_flight` deliveries are handled concurrently. On
    /// shutdown no new deliveries are pulled; handlers still running get
    /// `shutdown_grace` to finish and are then aborted, leaving their messages
    /// unacknowledged for redelivery.
    pub async fn run(
        &self,
        source: Arc<dyn MessageSource>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> IngestMetricsSnapshot {
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut handlers: JoinSet<DeliveryOutcome> = JoinSet::new();

        tracing::info!(
            max_in_flight = self.config.max_in_flight,
            processing_timeout_ms = self.config.processing_timeout.as_millis() as u64,
            max_deliveries = self.config.max_deliveries,
            "Subscriber started"
        );

        loop {
            while let Some(joined) = handlers.try_join_next() {
                log_handler_exit(joined);
            }

            // A dropped shutdown sender counts as a shutdown request.
            let permit = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown_rx) => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown_rx) => break,
                next = source.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    let span = tracing::info_span!(
                        "delivery",
                        message_id = %delivery.message_id(),
                        attempt = delivery.attempt()
                    );
                    let subscriber = self.clone();
                    handlers.spawn(
                        async move {
                            let _permit = permit;
                            subscriber.handle_delivery(delivery).await
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => {
                    tracing::info!("Message source closed");
                    break;
                }
                Err(e) => {
                    drop(permit);
                    IngestMetrics::incr(&self.metrics.source_errors);
                    tracing::error!(error = %e, "Failed to pull from message source");
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut shutdown_rx) => break,
                        _ = tokio::time::sleep(self.config.source_retry_delay) => {}
                    }
                }
            }
        }

        self.drain(&mut handlers).await;

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            received = snapshot.received,
            processed = snapshot.processed,
            acked = snapshot.acked,
            failures = snapshot.failures(),
            dead_lettered = snapshot.dead_lettered,
            "Subscriber stopped"
        );
        snapshot
    }

    async fn drain(&self, handlers: &mut JoinSet<DeliveryOutcome>) {
        if handlers.is_empty() {
            return;
        }

        let in_flight = handlers.len();
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = handlers.join_next().await {
                log_handler_exit(joined);
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                in_flight,
                remaining = handlers.len(),
                grace_ms = self.config.shutdown_grace.as_millis() as u64,
                "Abandoning in-flight deliveries to broker redelivery"
            );
            handlers.abort_all();
            while handlers.join_next().await.is_some() {}
        }
    }

    /// Process one delivery and settle it with the broker.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        IngestMetrics::incr(&self.metrics.received);

        let limit = self.config.processing_timeout;
        let result = match tokio::time::timeout(limit, self.pipeline.execute(delivery.payload()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(IngestError::Timeout {
                operation: "processing",
                limit,
            }),
        };

        match result {
            Ok(order_uid) => {
                IngestMetrics::incr(&self.metrics.processed);
                self.acknowledge(&delivery, &order_uid).await
            }
            Err(err) => self.settle_failure(&delivery, err).await,
        }
    }

    async fn acknowledge(&self, delivery: &Delivery, order_uid: &str) -> DeliveryOutcome {
        match tokio::time::timeout(self.config.ack_timeout, delivery.ack()).await {
            Ok(Ok(())) => {
                IngestMetrics::incr(&self.metrics.acked);
                tracing::debug!(order_uid = %order_uid, "Delivery acknowledged");
                DeliveryOutcome::Acknowledged
            }
            Ok(Err(e)) => {
                IngestMetrics::incr(&self.metrics.ack_failures);
                tracing::warn!(order_uid = %order_uid, error = %e, "Ack failed, expecting redelivery");
                DeliveryOutcome::AckFailed
            }
            Err(_) => {
                IngestMetrics::incr(&self.metrics.ack_failures);
                tracing::warn!(order_uid = %order_uid, "Ack timed out, expecting redelivery");
                DeliveryOutcome::AckFailed
            }
        }
    }

    async fn settle_failure(&self, delivery: &Delivery, err: IngestError) -> DeliveryOutcome {
        self.metrics.record_failure(&err);

        if err.is_permanent() && self.config.should_dead_letter(delivery.attempt()) {
            let reason = err.to_string();
            match tokio::time::timeout(self.config.ack_timeout, delivery.dead_letter(&reason)).await
            {
                Ok(Ok(())) => {
                    IngestMetrics::incr(&self.metrics.dead_lettered);
                    tracing::warn!(error = %err, "Delivery dead-lettered");
                    return DeliveryOutcome::DeadLettered;
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, cause = %err, "Failed to dead-letter delivery");
                }
                Err(_) => {
                    tracing::error!(cause = %err, "Dead-letter request timed out");
                }
            }
        } else if err.is_permanent() {
            tracing::warn!(error = %err, kind = err.kind(), "Rejected delivery left for redelivery");
        } else {
            tracing::error!(error = %err, kind = err.kind(), "Processing failed, leaving unacknowledged");
        }

        DeliveryOutcome::RedeliverPending { reason: err.kind() }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stop_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

fn log_handler_exit(joined: Result<DeliveryOutcome, JoinError>) {
    match joined {
        Ok(outcome) => tracing::trace!(?outcome, "Delivery handler finished"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(error = %e, "Delivery handler panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use async_trait::async_trait;
    use orderline_core::{OrderCache, SourceError, SourceResult};
    use orderline_storage::{MemoryOrderCache, MemoryRecordStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Harness {
        broker: MemoryBroker,
        store: MemoryRecordStore,
        cache: Arc<MemoryOrderCache>,
        subscriber: Subscriber,
    }

    fn harness(config: IngestConfig) -> Harness {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        let store = MemoryRecordStore::new();
        let cache = Arc::new(MemoryOrderCache::new());
        let pipeline =
            ProcessIncomingOrder::new(Arc::new(store.clone()), cache.clone(), config.store_timeout);
        Harness {
            broker,
            store,
            cache,
            subscriber: Subscriber::new(pipeline, config),
        }
    }

    fn fast_config() -> IngestConfig {
        IngestConfig {
            store_timeout: Duration::from_millis(200),
            processing_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(200),
            max_in_flight: 4,
            max_deliveries: 3,
            shutdown_grace: Duration::from_millis(200),
            source_retry_delay: Duration::from_millis(10),
        }
    }

    async fn next_delivery(broker: &MemoryBroker) -> Delivery {
        broker.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_success_is_acknowledged() {
        let h = harness(fast_config());
        h.broker.publish(br#"{"order_uid":"o1"}"#.to_vec());

        let outcome = h.subscriber.handle_delivery(next_delivery(&h.broker).await).await;

        assert_eq!(outcome, DeliveryOutcome::Acknowledged);
        assert_eq!(h.broker.pending(), 0);
        assert!(h.cache.get("o1").is_some());
        let snapshot = h.subscriber.metrics().snapshot();
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.acked, 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_acknowledged() {
        let h = harness(fast_config());
        h.store.set_unavailable(true);
        h.broker.publish(br#"{"order_uid":"o1"}"#.to_vec());

        let outcome = h.subscriber.handle_delivery(next_delivery(&h.broker).await).await;

        assert_eq!(outcome, DeliveryOutcome::RedeliverPending { reason: "store" });
        assert_eq!(h.broker.pending(), 1);
        assert_eq!(h.broker.acked(), 0);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_never_dead_letters() {
        let h = harness(fast_config());
        h.store.set_unavailable(true);
        h.broker.publish(br#"{"order_uid":"o1"}"#.to_vec());

        for _ in 0..5 {
            let delivery = next_delivery(&h.broker).await;
            h.subscriber.handle_delivery(delivery).await;
            h.broker.redeliver_all();
        }

        assert!(h.broker.dead_letters().is_empty());
        assert_eq!(h.broker.pending(), 1);

        h.store.set_unavailable(false);
        let outcome = h.subscriber.handle_delivery(next_delivery(&h.broker).await).await;
        assert_eq!(outcome, DeliveryOutcome::Acknowledged);
        assert_eq!(h.broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_dead_lettered_at_limit() {
        let h = harness(fast_config());
        h.broker.publish(b"{not json".to_vec());

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let delivery = next_delivery(&h.broker).await;
            outcomes.push(h.subscriber.handle_delivery(delivery).await);
            h.broker.redeliver_all();
        }

        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome::RedeliverPending { reason: "decode" },
                DeliveryOutcome::RedeliverPending { reason: "decode" },
                DeliveryOutcome::DeadLettered,
            ]
        );
        assert_eq!(h.broker.pending(), 0);
        assert_eq!(h.broker.acked(), 0);
        assert_eq!(h.broker.dead_letters()[0].attempts, 3);
        assert_eq!(h.store.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out_and_stays_pending() {
        let h = harness(fast_config());
        h.store.set_upsert_delay(Some(Duration::from_secs(5)));
        h.broker.publish(br#"{"order_uid":"o1"}"#.to_vec());

        let outcome = h.subscriber.handle_delivery(next_delivery(&h.broker).await).await;

        assert_eq!(outcome, DeliveryOutcome::RedeliverPending { reason: "timeout" });
        assert_eq!(h.broker.pending(), 1);
        assert_eq!(h.subscriber.metrics().snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_failed_ack_keeps_cache_and_store_updated() {
        let h = harness(fast_config());
        h.broker.set_fail_acks(true);
        h.broker.publish(br#"{"order_uid":"o1"}"#.to_vec());

        let outcome = h.subscriber.handle_delivery(next_delivery(&h.broker).await).await;

        assert_eq!(outcome, DeliveryOutcome::AckFailed);
        assert!(h.cache.get("o1").is_some());
        assert!(h.store.get_raw("o1").is_some());
        assert_eq!(h.broker.pending(), 1);
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let h = harness(fast_config());
        for i in 0..10 {
            h.broker
                .publish(format!(r#"{{"order_uid":"o{i}"}}"#).into_bytes());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = {
            let subscriber = h.subscriber.clone();
            let source: Arc<dyn MessageSource> = Arc::new(h.broker.clone());
            tokio::spawn(async move { subscriber.run(source, shutdown_rx).await })
        };

        let broker = h.broker.clone();
        wait_until(move || broker.acked() == 10).await;
        shutdown_tx.send(true).unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.acked, 10);
        assert_eq!(h.cache.len(), 10);
    }

    #[tokio::test]
    async fn test_run_ends_when_source_closes() {
        let h = harness(fast_config());
        h.broker.close();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let snapshot = tokio::time::timeout(
            Duration::from_secs(2),
            h.subscriber.run(Arc::new(h.broker.clone()), shutdown_rx),
        )
        .await
        .unwrap();

        assert_eq!(snapshot.received, 0);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_stuck_handler() {
        let config = IngestConfig {
            store_timeout: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(50),
            ..fast_config()
        };
        let h = harness(config);
        h.store.set_upsert_delay(Some(Duration::from_secs(30)));
        h.broker.publish(br#"{"order_uid":"o1"}"#.to_vec());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = {
            let subscriber = h.subscriber.clone();
            let source: Arc<dyn MessageSource> = Arc::new(h.broker.clone());
            tokio::spawn(async move { subscriber.run(source, shutdown_rx).await })
        };

        let store = h.store.clone();
        wait_until(move || store.upsert_calls() == 1).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.broker.pending(), 1);
        assert_eq!(h.broker.acked(), 0);
        assert!(h.cache.is_empty());
    }

    /// Fails the first pull, then behaves like the wrapped broker.
    struct FlakySource {
        inner: MemoryBroker,
        failed: AtomicBool,
    }

    #[async_trait]
    impl MessageSource for FlakySource {
        async fn next(&self) -> SourceResult<Option<Delivery>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(SourceError::Unavailable {
                    reason: "connection reset".to_string(),
                });
            }
            self.inner.next().await
        }
    }

    #[tokio::test]
    async fn test_source_error_is_retried() {
        let h = harness(fast_config());
        h.broker.publish(br#"{"order_uid":"o1"}"#.to_vec());
        let source = Arc::new(FlakySource {
            inner: h.broker.clone(),
            failed: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = {
            let subscriber = h.subscriber.clone();
            tokio::spawn(async move { subscriber.run(source, shutdown_rx).await })
        };

        let broker = h.broker.clone();
        wait_until(move || broker.acked() == 1).await;
        shutdown_tx.send(true).unwrap();

        let snapshot = run.await.unwrap();
        assert_eq!(snapshot.source_errors, 1);
        assert_eq!(snapshot.acked, 1);
    }
}
