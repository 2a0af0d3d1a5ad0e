//! ORDERLINE Core - Domain Model and Ports
//!
//! Defines the order entity, the error taxonomy shared by every layer, and the
//! narrow interfaces (ports) through which the consistency protocol talks to
//! its collaborators: the durable record store, the in-memory read cache and
//! the durable message source.

pub mod error;
pub mod order;
pub mod ports;

pub use error::{
    DecodeError, IngestError, IngestResult, SourceError, SourceResult, StoreError, StoreResult,
    ValidationError, WarmLoadError,
};
pub use order::{Order, RawDocument};
pub use ports::{
    Acknowledger, Delivery, MessageSource, OrderCache, RecordStore, RecordVisitor, StoredRecord,
};
