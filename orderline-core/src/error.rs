//! Error types for ORDERLINE operations

use std::time::Duration;
use thiserror::Error;

/// Record store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Upsert failed for order {order_uid}: {reason}")]
    UpsertFailed { order_uid: String, reason: String },

    #[error("Record stream failed: {reason}")]
    StreamFailed { reason: String },

    #[error("Record visitor aborted the stream: {reason}")]
    VisitorAborted { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Durable message source errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Message source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Acknowledgement failed for message {message_id}: {reason}")]
    AckFailed { message_id: String, reason: String },

    #[error("Dead-lettering failed for message {message_id}: {reason}")]
    DeadLetterFailed { message_id: String, reason: String },

    #[error("Publish failed: {reason}")]
    PublishFailed { reason: String },
}

/// Payload could not be decoded into an order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed order payload: {reason}")]
    Malformed { reason: String },
}

/// Decoded order failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },
}

/// Failure of a single ingestion attempt.
///
/// Every variant leaves the message unacknowledged; only permanent failures
/// are ever considered for dead-lettering.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
}

impl IngestError {
    /// Whether redelivering the identical payload can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, IngestError::Decode(_) | IngestError::Validation(_))
    }

    /// Short label used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "decode",
            IngestError::Validation(_) => "validation",
            IngestError::Store(_) => "store",
            IngestError::Timeout { .. } => "timeout",
        }
    }
}

/// Cache warm-load failed at the stream level.
///
/// Individual undecodable rows never produce this error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WarmLoadError {
    #[error("Warm-load aborted: {0}")]
    Stream(#[from] StoreError),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type SourceResult<T> = Result<T, SourceError>;
pub type IngestResult<T> = Result<T, IngestError>;
