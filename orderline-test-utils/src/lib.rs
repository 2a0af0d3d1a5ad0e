//! ORDERLINE Test Utilities
//!
//! Shared test infrastructure for the ORDERLINE workspace:
//! - Proptest generators for orders and raw payloads
//! - Fixtures for realistic order documents
//! - Assertions over the read cache and record store

// Re-export the in-memory adapters from their source crate
pub use orderline_storage::{MemoryOrderCache, MemoryRecordStore};

pub use orderline_core::{Order, OrderCache, RawDocument, RecordStore, StoreResult, StoredRecord};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for order payloads.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Generate a non-empty order identifier.
    pub fn arb_order_uid() -> impl Strategy<Value = String> {
        "[a-z0-9]{8,24}"
    }

    fn arb_item() -> impl Strategy<Value = serde_json::Value> {
        ("[A-Za-z ]{1,16}", 1i64..100_000, 0i64..100).prop_map(|(name, price, sale)| {
            json!({
                "chrt_id": price * 7,
                "name": name,
                "price": price,
                "sale": sale,
                "total_price": price * (100 - sale) / 100,
                "status": 202
            })
        })
    }

    fn document(value: &serde_json::Value) -> RawDocument {
        RawDocument::from_value(value).unwrap_or_default()
    }

    /// Generate a valid order with the given identity.
    pub fn arb_order_with_uid(order_uid: String) -> impl Strategy<Value = Order> {
        (
            "[A-Z]{4,14}",
            "[a-z]{2,5}",
            prop::collection::vec(arb_item(), 0..4),
            0i64..1000,
            1i64..1_000_000,
        )
            .prop_map(move |(track_number, locale, items, sm_id, amount)| Order {
                order_uid: order_uid.clone(),
                track_number,
                entry: "WBIL".to_string(),
                delivery: document(&json!({ "name": "Test Testov", "city": "Kiryat Mozkin" })),
                payment: document(
                    &json!({ "transaction": order_uid, "amount": amount, "currency": "USD" }),
                ),
                items: document(&serde_json::Value::Array(items)),
                locale,
                customer_id: "test".to_string(),
                delivery_service: "meest".to_string(),
                shardkey: "9".to_string(),
                sm_id,
                date_created: "2021-11-26T06:22:19Z".to_string(),
                oof_shard: "1".to_string(),
                ..Default::default()
            })
    }

    /// Generate a valid order.
    pub fn arb_order() -> impl Strategy<Value = Order> {
        arb_order_uid().prop_flat_map(arb_order_with_uid)
    }

    /// Generate a valid order together with its wire encoding.
    pub fn arb_order_payload() -> impl Strategy<Value = (Order, Vec<u8>)> {
        arb_order().prop_map(|order| {
            let raw = serde_json::to_vec(&order).unwrap_or_default();
            (order, raw)
        })
    }

    /// Generate bytes that never decode as an order.
    pub fn arb_corrupt_payload() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            Just(b"{not json".to_vec()),
            Just(b"[1,2,3]".to_vec()),
            Just(br#"{"order_uid": 42}"#.to_vec()),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(|mut bytes| {
                bytes.insert(0, 0xff);
                bytes
            }),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built order documents for common scenarios.

    use super::*;
    use serde_json::json;

    /// A complete order document in the shape the upstream producer emits.
    pub fn sample_order_json(order_uid: &str, track_number: &str) -> serde_json::Value {
        json!({
            "order_uid": order_uid,
            "track_number": track_number,
            "entry": "WBIL",
            "delivery": {
                "name": "Test Testov",
                "phone": "+9720000000",
                "zip": "2639809",
                "city": "Kiryat Mozkin",
                "address": "Ploshad Mira 15",
                "region": "Kraiot",
                "email": "test@gmail.com"
            },
            "payment": {
                "transaction": order_uid,
                "request_id": "",
                "currency": "USD",
                "provider": "wbpay",
                "amount": 1817,
                "payment_dt": 1637907727,
                "bank": "alpha",
                "delivery_cost": 1500,
                "goods_total": 317,
                "custom_fee": 0
            },
            "items": [
                {
                    "chrt_id": 9934930,
                    "track_number": track_number,
                    "price": 453,
                    "rid": "ab4219087a764ae0btest",
                    "name": "Mascaras",
                    "sale": 30,
                    "size": "0",
                    "total_price": 317,
                    "nm_id": 2389212,
                    "brand": "Vivienne Sabo",
                    "status": 202
                }
            ],
            "locale": "en",
            "internal_signature": "",
            "customer_id": "test",
            "delivery_service": "meest",
            "shardkey": "9",
            "sm_id": 99,
            "date_created": "2021-11-26T06:22:19Z",
            "oof_shard": "1"
        })
    }

    /// [`sample_order_json`] encoded as a raw message payload.
    pub fn sample_order_payload(order_uid: &str, track_number: &str) -> Vec<u8> {
        sample_order_json(order_uid, track_number)
            .to_string()
            .into_bytes()
    }

    /// [`sample_order_json`] decoded into an [`Order`].
    pub fn sample_order(order_uid: &str, track_number: &str) -> Order {
        Order::decode(&sample_order_payload(order_uid, track_number))
            .unwrap_or_else(|e| panic!("sample order must decode: {e}"))
    }

    /// A payload with every field present except a usable identity.
    pub fn payload_without_uid() -> Vec<u8> {
        sample_order_payload("", "WBILMTESTTRACK")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the read cache and record store.

    use super::*;

    /// Assert that `order_uid` is cached with the given track number.
    #[track_caller]
    pub fn assert_cached(cache: &dyn OrderCache, order_uid: &str, track_number: &str) {
        match cache.get(order_uid) {
            Some(order) => assert_eq!(
                order.track_number, track_number,
                "Wrong cached version of {order_uid}"
            ),
            None => panic!("Expected {order_uid} in cache"),
        }
    }

    /// Assert that `order_uid` is not cached.
    #[track_caller]
    pub fn assert_not_cached(cache: &dyn OrderCache, order_uid: &str) {
        if let Some(order) = cache.get(order_uid) {
            panic!("Expected {order_uid} absent from cache, found: {order:?}");
        }
    }

    /// Assert that every stored record decodes to exactly what the cache holds.
    #[track_caller]
    pub fn assert_cache_matches_store(cache: &MemoryOrderCache, store: &MemoryRecordStore) {
        assert_eq!(cache.len(), store.len(), "Cache and store sizes differ");
        for order_uid in cache.keys() {
            let raw = store
                .get_raw(&order_uid)
                .unwrap_or_else(|| panic!("{order_uid} cached but not stored"));
            let stored = Order::decode(&raw)
                .unwrap_or_else(|e| panic!("{order_uid} stored undecodable: {e}"));
            let cached = cache
                .get(&order_uid)
                .unwrap_or_else(|| panic!("{order_uid} vanished from cache"));
            assert_eq!(*cached, stored, "Cache diverged from store for {order_uid}");
        }
    }
}
