//! End-to-end consistency and recovery tests over the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use orderline_core::{MessageSource, Order, OrderCache};
use orderline_ingest::{
    GetOrderById, IngestConfig, LoadCache, MemoryBroker, ProcessIncomingOrder, Readiness,
    Subscriber,
};
use orderline_test_utils::assertions::{assert_cache_matches_store, assert_cached, assert_not_cached};
use orderline_test_utils::fixtures::sample_order_payload;
use orderline_test_utils::generators::{
    arb_corrupt_payload, arb_order_payload, arb_order_uid, arb_order_with_uid,
};
use orderline_test_utils::{MemoryOrderCache, MemoryRecordStore};
use proptest::prelude::*;
use tokio::sync::watch;

fn test_config() -> IngestConfig {
    IngestConfig {
        store_timeout: Duration::from_millis(200),
        processing_timeout: Duration::from_millis(500),
        ack_timeout: Duration::from_millis(200),
        max_in_flight: 8,
        max_deliveries: 2,
        shutdown_grace: Duration::from_millis(200),
        source_retry_delay: Duration::from_millis(10),
    }
}

struct Service {
    broker: MemoryBroker,
    store: MemoryRecordStore,
    cache: Arc<MemoryOrderCache>,
    subscriber: Subscriber,
    shutdown_tx: watch::Sender<bool>,
    run: tokio::task::JoinHandle<orderline_ingest::IngestMetricsSnapshot>,
}

impl Service {
    fn start(store: MemoryRecordStore, ack_wait: Duration) -> Self {
        let config = test_config();
        let broker = MemoryBroker::new(ack_wait);
        let cache = Arc::new(MemoryOrderCache::new());
        let pipeline =
            ProcessIncomingOrder::new(Arc::new(store.clone()), cache.clone(), config.store_timeout);
        let subscriber = Subscriber::new(pipeline, config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = {
            let subscriber = subscriber.clone();
            let source: Arc<dyn MessageSource> = Arc::new(broker.clone());
            tokio::spawn(async move { subscriber.run(source, shutdown_rx).await })
        };

        Self {
            broker,
            store,
            cache,
            subscriber,
            shutdown_tx,
            run,
        }
    }

    async fn stop(self) -> orderline_ingest::IngestMetricsSnapshot {
        let _ = self.shutdown_tx.send(true);
        tokio::time::timeout(Duration::from_secs(2), self.run)
            .await
            .expect("subscriber did not stop")
            .expect("subscriber panicked")
    }
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn store_outage_defers_ack_until_recovery() {
    let store = MemoryRecordStore::new();
    store.set_unavailable(true);
    let service = Service::start(store, Duration::from_millis(50));
    service
        .broker
        .publish(sample_order_payload("o1", "TRACK-1"));

    let metrics = service.subscriber.metrics();
    eventually("a failed attempt", || metrics.snapshot().store_failures >= 2).await;
    assert_eq!(service.broker.acked(), 0);
    assert_not_cached(&*service.cache, "o1");

    service.store.set_unavailable(false);
    let broker = service.broker.clone();
    eventually("acknowledgement after recovery", move || broker.acked() == 1).await;

    assert_cached(&*service.cache, "o1", "TRACK-1");
    assert!(service.broker.dead_letters().is_empty());
    let snapshot = service.stop().await;
    assert_eq!(snapshot.acked, 1);
}

#[tokio::test]
async fn malformed_message_is_dead_lettered_without_blocking_others() {
    let service = Service::start(MemoryRecordStore::new(), Duration::from_millis(30));
    service.broker.publish(b"{not json".to_vec());
    service.broker.publish(sample_order_payload("o1", "TRACK-1"));
    service.broker.publish(sample_order_payload("o2", "TRACK-2"));

    let broker = service.broker.clone();
    eventually("dead letter and acks", move || {
        broker.dead_letters().len() == 1 && broker.acked() == 2
    })
    .await;

    let dead = service.broker.dead_letters();
    assert_eq!(dead[0].payload, b"{not json".to_vec());
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(service.store.len(), 2);
    assert_eq!(service.broker.pending(), 0);
    service.stop().await;
}

#[tokio::test]
async fn later_version_replaces_earlier_one() {
    let service = Service::start(MemoryRecordStore::new(), Duration::from_secs(60));
    let v1 = sample_order_payload("o1", "TRACK-1");
    let v2 = sample_order_payload("o1", "TRACK-2");

    service.broker.publish(v1);
    let broker = service.broker.clone();
    eventually("first version", move || broker.acked() == 1).await;
    service.broker.publish(v2.clone());
    let broker = service.broker.clone();
    eventually("second version", move || broker.acked() == 2).await;

    assert_cached(&*service.cache, "o1", "TRACK-2");
    assert_eq!(service.store.get_raw("o1"), Some(v2));
    service.stop().await;
}

#[tokio::test]
async fn restart_rebuilds_cache_from_store() {
    let store = MemoryRecordStore::new();
    let service = Service::start(store.clone(), Duration::from_secs(60));
    for i in 0..5 {
        service
            .broker
            .publish(sample_order_payload(&format!("o{i}"), &format!("T{i}")));
    }
    let broker = service.broker.clone();
    eventually("all acknowledged", move || broker.acked() == 5).await;
    service.stop().await;

    // Fresh process: empty cache, same store.
    let cache = Arc::new(MemoryOrderCache::new());
    let readiness = Readiness::new();
    let report = LoadCache::new(Arc::new(store.clone()), cache.clone())
        .execute_and_mark_ready(&readiness)
        .await
        .unwrap();

    assert_eq!(report.loaded, 5);
    assert!(readiness.is_ready());
    assert_cache_matches_store(&cache, &store);
}

#[tokio::test]
async fn warm_load_survives_corrupt_rows() {
    let store = MemoryRecordStore::new();
    store.insert_raw("a", sample_order_payload("a", "TA"));
    store.insert_raw("b", b"\x7b\x22broken".to_vec());
    let cache = Arc::new(MemoryOrderCache::new());
    let readiness = Readiness::new();

    let report = LoadCache::new(Arc::new(store), cache.clone())
        .execute_and_mark_ready(&readiness)
        .await
        .unwrap();

    assert_eq!((report.loaded, report.skipped), (1, 1));
    let reader = GetOrderById::new(cache);
    assert_eq!(reader.execute("a").unwrap().track_number, "TA");
    assert!(reader.execute("b").is_none());
    assert!(readiness.is_ready());
}

#[tokio::test]
async fn reads_are_served_while_a_write_is_stuck() {
    let store = MemoryRecordStore::new();
    let cache = Arc::new(MemoryOrderCache::new());
    let pipeline = ProcessIncomingOrder::new(
        Arc::new(store.clone()),
        cache.clone(),
        Duration::from_secs(10),
    );
    pipeline
        .execute(&sample_order_payload("o1", "OLD"))
        .await
        .unwrap();

    store.set_upsert_delay(Some(Duration::from_millis(300)));
    let pending = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(&sample_order_payload("o1", "NEW")).await })
    };

    let reader = GetOrderById::new(cache.clone());
    let watched = store.clone();
    eventually("write in flight", move || watched.upsert_calls() == 2).await;
    let started = tokio::time::Instant::now();
    assert_eq!(reader.execute("o1").unwrap().track_number, "OLD");
    assert!(started.elapsed() < Duration::from_millis(100));

    pending.await.unwrap().unwrap();
    assert_eq!(reader.execute("o1").unwrap().track_number, "NEW");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn redelivered_payload_converges(
        (order, raw) in arb_order_payload(),
        deliveries in 1usize..8,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let store = MemoryRecordStore::new();
        let cache = Arc::new(MemoryOrderCache::new());
        let pipeline = ProcessIncomingOrder::new(
            Arc::new(store.clone()),
            cache.clone(),
            Duration::from_secs(1),
        );

        runtime.block_on(async {
            let mut handles = Vec::new();
            for _ in 0..deliveries {
                let pipeline = pipeline.clone();
                let raw = raw.clone();
                handles.push(tokio::spawn(async move { pipeline.execute(&raw).await }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        });

        prop_assert_eq!(store.len(), 1);
        prop_assert_eq!(store.get_raw(&order.order_uid), Some(raw.clone()));
        prop_assert_eq!(cache.len(), 1);
        let cached = cache.get(&order.order_uid).unwrap();
        prop_assert_eq!(&*cached, &order);
    }

    #[test]
    fn concurrent_versions_leave_cache_matching_store(
        versions in arb_order_uid().prop_flat_map(|uid| {
            prop::collection::vec(arb_order_with_uid(uid), 2..6)
        }),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let store = MemoryRecordStore::new();
        let cache = Arc::new(MemoryOrderCache::new());
        let pipeline = ProcessIncomingOrder::new(
            Arc::new(store.clone()),
            cache.clone(),
            Duration::from_secs(1),
        );

        runtime.block_on(async {
            let mut handles = Vec::new();
            for order in &versions {
                let pipeline = pipeline.clone();
                let raw = serde_json::to_vec(order).unwrap();
                handles.push(tokio::spawn(async move { pipeline.execute(&raw).await }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        });

        prop_assert_eq!(store.len(), 1);
        let stored = Order::decode(&store.get_raw(&versions[0].order_uid).unwrap()).unwrap();
        prop_assert!(versions.contains(&stored));
        assert_cache_matches_store(&cache, &store);
    }

    #[test]
    fn warm_load_skips_every_corrupt_blob(
        (order, raw) in arb_order_payload(),
        corrupt in prop::collection::vec(arb_corrupt_payload(), 1..8),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let store = MemoryRecordStore::new();
        store.insert_raw(&order.order_uid, raw);
        for (i, blob) in corrupt.iter().enumerate() {
            store.insert_raw(&format!("corrupt-{i}"), blob.clone());
        }
        let cache = Arc::new(MemoryOrderCache::new());
        let readiness = Readiness::new();

        let report = runtime
            .block_on(
                LoadCache::new(Arc::new(store), cache.clone()).execute_and_mark_ready(&readiness),
            )
            .unwrap();

        prop_assert_eq!(report.loaded, 1);
        prop_assert_eq!(report.skipped, corrupt.len() as u64);
        prop_assert!(readiness.is_ready());
        prop_assert_eq!(cache.len(), 1);
        prop_assert_eq!(&*cache.get(&order.order_uid).unwrap(), &order);
    }
}
