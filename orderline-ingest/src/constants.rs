//! Default values for the ingestion subsystem.

/// Deadline for a single record store upsert (milliseconds).
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 3_000;

/// Deadline for one full processing attempt of a delivery (milliseconds).
pub const DEFAULT_PROCESSING_TIMEOUT_MS: u64 = 5_000;

/// Deadline for confirming a delivery with the broker (milliseconds).
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

/// Maximum number of deliveries handled concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Delivery attempt at which a permanently malformed message is dead-lettered.
/// Zero disables dead-lettering.
pub const DEFAULT_MAX_DELIVERIES: u32 = 16;

/// Time in-flight handlers get to finish after shutdown (milliseconds).
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Pause before pulling again after the message source failed (milliseconds).
pub const DEFAULT_SOURCE_RETRY_DELAY_MS: u64 = 1_000;

/// How long the in-memory broker waits for an ack before redelivering (milliseconds).
pub const DEFAULT_ACK_WAIT_MS: u64 = 10_000;
