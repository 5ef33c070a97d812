//! Inbound and outbound buffers of an execution node.

use super::handle::Rejected;
use crate::element::{Element, split_front, total_size};
use crate::error::Error;
use crate::operator::Step;
use std::collections::VecDeque;

// ============================================================================
// Inbound
// ============================================================================

/// Input elements pushed by the previous node but not yet consumed.
pub(crate) struct Inbound<I> {
    buffer: VecDeque<I>,
    size: u64,
}

impl<I: Element> Inbound<I> {
    pub(crate) fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            size: 0,
        }
    }

    /// Append a pushed batch.
    ///
    /// Returns the batch's size and approximate bytes. Empty batches and
    /// batches that would grow the buffer beyond `max_buffered` are handed
    /// back and leave the buffer unchanged.
    pub(crate) fn push(
        &mut self,
        batch: Vec<I>,
        max_buffered: u64,
    ) -> Result<(u64, u64), Rejected<I>> {
        let size = total_size(&batch);
        if size == 0 {
            return Err(Rejected {
                error: Error::logic("received an empty batch"),
                batch,
            });
        }
        if self.size + size > max_buffered {
            return Err(Rejected {
                error: Error::logic(format!(
                    "inbound buffer overflow: {} buffered + {} pushed exceeds {}",
                    self.size, size, max_buffered
                )),
                batch,
            });
        }
        let approx_bytes = batch.iter().map(Element::approx_bytes).sum();
        self.buffer
            .extend(batch.into_iter().filter(|element| element.size() > 0));
        self.size += size;
        Ok((size, approx_bytes))
    }

    fn pop(&mut self) -> Option<I> {
        let next = self.buffer.pop_front()?;
        self.size -= next.size();
        Some(next)
    }

    /// Buffered size.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Number of buffered elements.
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// The lazy input sequence handed to an operator.
///
/// Yields the buffered input elements one by one in arrival order. When the
/// buffer is empty it returns [`Step::Pending`] while the previous node is
/// alive and [`Step::Done`] once it is gone.
pub struct InputAdapter<'a, I> {
    inbound: Option<&'a mut Inbound<I>>,
    upstream_alive: bool,
    stalled: bool,
    consumed: u64,
}

impl<'a, I: Element> InputAdapter<'a, I> {
    pub(crate) fn new(inbound: &'a mut Inbound<I>, upstream_alive: bool) -> Self {
        Self {
            inbound: Some(inbound),
            upstream_alive,
            stalled: false,
            consumed: 0,
        }
    }

    /// An adapter without input, as seen by sources.
    pub fn none() -> Self {
        Self {
            inbound: None,
            upstream_alive: false,
            stalled: false,
            consumed: 0,
        }
    }

    /// Take the next input element.
    pub fn next(&mut self) -> Step<I> {
        let Some(inbound) = self.inbound.as_deref_mut() else {
            return Step::Done;
        };
        match inbound.pop() {
            Some(element) => {
                self.consumed += element.size();
                Step::Yield(element)
            }
            None if self.upstream_alive => {
                self.stalled = true;
                Step::Pending
            }
            None => Step::Done,
        }
    }

    /// Size of the input that is ready to be taken.
    pub fn buffered(&self) -> u64 {
        self.inbound.as_ref().map_or(0, |inbound| inbound.size())
    }

    /// Whether no more input will ever arrive.
    pub fn is_exhausted(&self) -> bool {
        !self.upstream_alive && self.buffered() == 0
    }

    /// Whether the operator asked for input that was not there yet.
    pub(crate) fn stalled(&self) -> bool {
        self.stalled
    }

    /// Size of the input taken through this adapter.
    pub(crate) fn consumed(&self) -> u64 {
        self.consumed
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Output produced by the operator but not yet delivered.
///
/// A batch that is being delivered is moved out of the buffer but still
/// counted until the delivery completes, so a failed delivery can be put
/// back at the front without reordering.
pub(crate) struct Outbound<O> {
    buffer: VecDeque<O>,
    size: u64,
    /// Size and approximate bytes of the batch being delivered.
    in_flight: Option<(u64, u64)>,
}

impl<O: Element> Outbound<O> {
    pub(crate) fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            size: 0,
            in_flight: None,
        }
    }

    /// Append a produced element; empty elements are dropped.
    pub(crate) fn push(&mut self, element: O) {
        let size = element.size();
        if size > 0 {
            self.size += size;
            self.buffer.push_back(element);
        }
    }

    /// Size held in the buffer, excluding any in-flight delivery.
    pub(crate) fn held(&self) -> u64 {
        self.size
    }

    /// Size held plus size in flight.
    pub(crate) fn total(&self) -> u64 {
        self.size + self.in_flight.map_or(0, |(size, _)| size)
    }

    /// Number of held elements.
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Nothing held and nothing in flight.
    pub(crate) fn is_drained(&self) -> bool {
        self.size == 0 && self.in_flight.is_none()
    }

    /// Move a prefix of size `n` out for delivery.
    pub(crate) fn take_front(&mut self, n: u64) -> Vec<O> {
        let batch = split_front(&mut self.buffer, n);
        let size = total_size(&batch);
        let approx_bytes = batch.iter().map(Element::approx_bytes).sum();
        self.size -= size;
        self.in_flight = Some((size, approx_bytes));
        batch
    }

    /// The in-flight batch was accepted; returns its size and approximate
    /// bytes.
    pub(crate) fn complete(&mut self) -> (u64, u64) {
        self.in_flight.take().unwrap_or((0, 0))
    }

    /// The in-flight batch was handed back; put it in front again.
    pub(crate) fn restore(&mut self, batch: Vec<O>) {
        self.in_flight = None;
        for element in batch.into_iter().rev() {
            let size = element.size();
            if size > 0 {
                self.size += size;
                self.buffer.push_front(element);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &O> {
        self.buffer.iter()
    }
}
