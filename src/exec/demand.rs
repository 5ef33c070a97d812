//! Demand limits and the outstanding demand of a node.

use super::handle::PushHandle;
use crate::defaults::MAX_BATCHES;
use crate::element::Element;
use crate::error::Result;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Resolved demand limits for one side of an execution node.
///
/// All sizes are in the unit of the element's [`Element::size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandLimits {
    /// Upper bound for a single pull request.
    pub max_batch_size: u64,
    /// Free inbound capacity required before requesting more input.
    pub min_batch_size: u64,
    /// Upper bound for the buffered elements.
    pub max_buffered: u64,
    /// Upper bound for the number of buffered elements, regardless of
    /// their size.
    pub max_batches: usize,
    /// How long a pull waits for a full batch.
    pub batch_timeout: Duration,
}

impl DemandLimits {
    /// Create limits, clamping them so that
    /// `min_batch_size <= max_batch_size <= max_buffered`.
    ///
    /// The element count bound starts at [`MAX_BATCHES`].
    pub fn new(
        max_batch_size: u64,
        min_batch_size: u64,
        max_buffered: u64,
        batch_timeout: Duration,
    ) -> Self {
        let max_batch_size = max_batch_size.min(max_buffered);
        Self {
            max_batch_size,
            min_batch_size: min_batch_size.min(max_batch_size),
            max_buffered,
            max_batches: MAX_BATCHES,
            batch_timeout,
        }
    }

    /// Set the element count bound; at least one element is always allowed.
    pub fn with_max_batches(mut self, max_batches: usize) -> Self {
        self.max_batches = max_batches.max(1);
        self
    }

    /// The compile-time defaults of an element type.
    pub fn of<E: Element>() -> Self {
        Self::new(
            E::MAX_BATCH_SIZE,
            E::MIN_BATCH_SIZE,
            E::MAX_BUFFERED,
            E::BATCH_TIMEOUT,
        )
        .with_max_batches(E::MAX_BATCHES)
    }

    /// Size of the next pull given the current inbound buffer size and
    /// element count, or `None` if there is not enough room to ask for at
    /// least `min_batch_size` or the buffer already holds `max_batches`
    /// elements.
    pub fn next_request(&self, buffered: u64, batches: usize) -> Option<u64> {
        if batches >= self.max_batches {
            return None;
        }
        let batch_size = self
            .max_buffered
            .saturating_sub(buffered)
            .min(self.max_batch_size);
        (batch_size > 0 && batch_size >= self.min_batch_size).then_some(batch_size)
    }
}

/// An outstanding request from the next node.
pub(crate) struct Demand<O> {
    pub(crate) sink: PushHandle<O>,
    pub(crate) batch_size: u64,
    pub(crate) deadline: Instant,
    pub(crate) reply: oneshot::Sender<Result<()>>,
    /// A delivery for this demand is in flight.
    pub(crate) ongoing: bool,
}

impl<O: Element> Demand<O> {
    /// Whether a non-forced delivery may proceed. A full outbound buffer
    /// cannot grow towards the requested size, so it does not wait for the
    /// deadline either.
    pub(crate) fn ready(&self, buffered: u64, full: bool, exhausted: bool, now: Instant) -> bool {
        exhausted || full || buffered >= self.batch_size || self.deadline <= now
    }

    pub(crate) fn resolve(self, result: Result<()>) {
        let _ = self.reply.send(result);
    }
}
