//! Core element traits.

use crate::defaults;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Element Kind
// ============================================================================

/// The kind of elements flowing through one side of an execution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Nothing flows here: the input of a source or the output of a sink.
    Void,
    /// Raw byte chunks.
    Bytes,
    /// Structured record batches.
    Events,
}

impl ElementKind {
    /// Label of the unit `size()` counts in, used in metrics.
    pub fn unit(&self) -> &'static str {
        match self {
            ElementKind::Void => "void",
            ElementKind::Bytes => "bytes",
            ElementKind::Events => "events",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit())
    }
}

// ============================================================================
// Defaults Trait
// ============================================================================

/// Per-element-type demand limits.
///
/// All sizes are expressed in the unit of [`Element::size`].
pub trait Defaults {
    /// Upper bound for a single pull request.
    const MAX_BATCH_SIZE: u64;

    /// Free inbound capacity required before requesting more input.
    const MIN_BATCH_SIZE: u64;

    /// Upper bound for the inbound and outbound buffers.
    const MAX_BUFFERED: u64;

    /// How long a pull request waits for a full batch.
    const BATCH_TIMEOUT: Duration = defaults::MAX_BATCH_TIMEOUT;

    /// Upper bound for the number of buffered elements.
    const MAX_BATCHES: usize = defaults::MAX_BATCHES;
}

// ============================================================================
// Element Trait
// ============================================================================

/// A unit of data transferred between execution nodes.
///
/// The set of element types is closed: [`Chunk`](super::Chunk),
/// [`RecordBatch`](super::RecordBatch) and [`Void`]. Execution nodes are
/// generic over their input and output element, so all buffer bookkeeping is
/// statically dispatched.
pub trait Element: Defaults + Send + Sized + 'static {
    /// Which kind of element this is.
    const KIND: ElementKind;

    /// Size of this element: bytes for chunks, rows for record batches.
    fn size(&self) -> u64;

    /// Split into a prefix of size `at` and the remainder.
    ///
    /// Splitting at or beyond `size()` yields the whole element and an empty
    /// remainder.
    fn split(self, at: u64) -> (Self, Self);

    /// Approximate number of bytes referenced by this element.
    fn approx_bytes(&self) -> u64 {
        self.size()
    }
}

// ============================================================================
// Void
// ============================================================================

/// The element type of "nothing".
///
/// A node with `Void` input is a source, a node with `Void` output is a sink.
/// `Void` has no values, so buffers of it are always empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Void {}

impl Defaults for Void {
    const MAX_BATCH_SIZE: u64 = 0;
    const MIN_BATCH_SIZE: u64 = 0;
    const MAX_BUFFERED: u64 = 0;
}

impl Element for Void {
    const KIND: ElementKind = ElementKind::Void;

    fn size(&self) -> u64 {
        match *self {}
    }

    fn split(self, _at: u64) -> (Self, Self) {
        match self {}
    }
}

// ============================================================================
// Buffer Helpers
// ============================================================================

/// Total size of a sequence of elements.
pub fn total_size<'a, T: Element>(elements: impl IntoIterator<Item = &'a T>) -> u64 {
    elements.into_iter().map(Element::size).sum()
}

/// Remove a prefix of total size `n` from the front of `buffer`.
///
/// Whole elements are moved out while they fit; the element straddling the
/// partition point is split once. If the buffer holds less than `n`, all of
/// it is returned. Zero-sized elements at the front are dropped.
pub fn split_front<T: Element>(buffer: &mut VecDeque<T>, n: u64) -> Vec<T> {
    let mut remaining = n;
    let mut prefix = Vec::new();
    while remaining > 0 {
        let Some(front) = buffer.pop_front() else {
            break;
        };
        let size = front.size();
        if size == 0 {
            continue;
        }
        if size <= remaining {
            remaining -= size;
            prefix.push(front);
            continue;
        }
        let (lhs, rhs) = front.split(remaining);
        prefix.push(lhs);
        buffer.push_front(rhs);
        remaining = 0;
    }
    prefix
}
