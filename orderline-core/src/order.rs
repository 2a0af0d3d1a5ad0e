//! The order entity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value as JsonValue;

use crate::error::{DecodeError, ValidationError};

/// Materialized order as held by the read cache and served to readers.
///
/// `delivery`, `payment` and `items` are opaque documents: they are carried
/// through byte for byte and never validated. Absent or `null` fields decode
/// to their empty default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    /// Identity. Must be non-empty for the order to be accepted.
    #[serde(deserialize_with = "null_as_default")]
    pub order_uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub track_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub entry: String,
    pub delivery: RawDocument,
    pub payment: RawDocument,
    pub items: RawDocument,
    #[serde(deserialize_with = "null_as_default")]
    pub locale: String,
    #[serde(deserialize_with = "null_as_default")]
    pub internal_signature: String,
    #[serde(deserialize_with = "null_as_default")]
    pub customer_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_service: String,
    #[serde(deserialize_with = "null_as_default")]
    pub shardkey: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sm_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub date_created: String,
    #[serde(deserialize_with = "null_as_default")]
    pub oof_shard: String,
}

impl Order {
    /// Decode a raw payload as received from the message source or the store.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Check the only invariant enforced on an order: a non-empty identity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_uid.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "order_uid".to_string(),
            });
        }
        Ok(())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// RAW DOCUMENTS
// ============================================================================

/// A JSON document kept as the exact text it was received in.
///
/// Key order, whitespace and number spelling survive decode and re-encode.
/// An absent or `null` document is empty and serializes as `null`.
#[derive(Debug, Clone, Default)]
pub struct RawDocument(Option<Box<RawValue>>);

impl RawDocument {
    /// Encode `value` compactly.
    pub fn from_value(value: &JsonValue) -> serde_json::Result<Self> {
        serde_json::value::to_raw_value(value).map(|raw| Self(Some(raw)))
    }

    /// The document text, `null` when empty.
    pub fn as_str(&self) -> &str {
        self.0.as_deref().map_or("null", RawValue::get)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Parse the document for inspection.
    pub fn to_value(&self) -> serde_json::Result<JsonValue> {
        serde_json::from_str(self.as_str())
    }
}

impl PartialEq for RawDocument {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RawDocument {}

impl Serialize for RawDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Some(raw) => raw.serialize(serializer),
            None => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for RawDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<Box<RawValue>>::deserialize(deserializer).map(Self)
    }
}
