//! Default demand limits and timing constants.
//!
//! These values determine backpressure behavior exactly: how much an
//! execution node buffers, how much it asks its predecessor for, and how
//! long a downstream node is willing to wait for an under-full batch.
//!
//! Element-specific limits live on the [`Defaults`](crate::element::Defaults)
//! implementations of [`Chunk`](crate::element::Chunk) and
//! [`RecordBatch`](crate::element::RecordBatch); this module only defines the
//! raw values and the limits shared by all element types.
//!
//! # Design Rationale
//!
//! - Byte limits are sized so a node holds a handful of socket reads or file
//!   blocks at once.
//! - Event limits count rows, not bytes, and are sized so a node holds a few
//!   typical batches of 8-64 Ki events.

use std::time::Duration;

const KI: u64 = 1024;
const MI: u64 = 1024 * 1024;

// =============================================================================
// Byte Chunks
// =============================================================================

/// Upper bound for a single pull request of bytes.
pub const BYTES_MAX_BATCH_SIZE: u64 = MI;

/// Free inbound capacity (in bytes) required before requesting more input.
pub const BYTES_MIN_BATCH_SIZE: u64 = 128 * KI;

/// Upper bound for the inbound and outbound byte buffers of a node.
pub const BYTES_MAX_BUFFERED: u64 = 4 * MI;

// =============================================================================
// Record Batches
// =============================================================================

/// Upper bound for a single pull request of events.
pub const EVENTS_MAX_BATCH_SIZE: u64 = 64 * KI;

/// Free inbound capacity (in events) required before requesting more input.
pub const EVENTS_MIN_BATCH_SIZE: u64 = 8 * KI;

/// Upper bound for the inbound and outbound event buffers of a node.
pub const EVENTS_MAX_BUFFERED: u64 = 254 * KI;

// =============================================================================
// Shared
// =============================================================================

/// Upper bound for how long a node waits for a full batch from its
/// predecessor before accepting an under-full one.
pub const MAX_BATCH_TIMEOUT: Duration = Duration::from_millis(250);

/// Interval at which execution nodes emit their metrics.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for the number of elements buffered on either side of a
/// node, on top of the size limits. Many tiny elements cost far more
/// memory than their size suggests.
pub const MAX_BATCHES: usize = 20;

/// Number of steps an operator's output sequence is advanced per run before
/// the node yields back to the scheduler.
pub const STEPS_PER_RUN: usize = 32;

/// First delay used when re-polling an operator that keeps returning
/// `Pending` on its own.
pub const MIN_IDLE_BACKOFF: Duration = Duration::from_millis(30);

/// Upper bound for the re-poll delay of an idle operator.
pub const MAX_IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// Growth factor of the idle backoff.
pub const IDLE_BACKOFF_RATE: f64 = 2.0;

/// Capacity of the pipeline event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
