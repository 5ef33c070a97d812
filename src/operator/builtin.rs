//! Builtin operators for composing and testing pipelines.

use super::{
    BoxGenerator, ControlPlane, EventOrder, Filter, Operator, OptimizeResult, Step, from_fn,
    from_iter,
};
use crate::element::{Chunk, Element, RecordBatch, Row, Schema, Value, Void};
use crate::error::{Error, Result};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// IterSource
// ============================================================================

/// A source that yields the items of an iterator, then finishes.
///
/// # Example
///
/// ```rust
/// use sluice::element::Chunk;
/// use sluice::operator::IterSource;
///
/// let source = IterSource::new("greeting", vec![Chunk::from("hello"), Chunk::from("world")]);
/// ```
pub struct IterSource<O> {
    name: String,
    items: Option<Box<dyn Iterator<Item = O> + Send>>,
}

impl<O: Element> IterSource<O> {
    /// Create a source named `name` yielding `items`.
    pub fn new<T>(name: impl Into<String>, items: T) -> Self
    where
        T: IntoIterator<Item = O>,
        T::IntoIter: Send + 'static,
    {
        Self {
            name: name.into(),
            items: Some(Box::new(items.into_iter())),
        }
    }
}

impl<O: Element> Operator for IterSource<O> {
    type Input = Void;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Void, O>> {
        let items = self
            .items
            .take()
            .ok_or_else(|| Error::logic(format!("source '{}' was already instantiated", self.name)))?;
        Ok(from_iter(items))
    }
}

// ============================================================================
// Passthrough
// ============================================================================

/// Forwards its input unchanged.
///
/// The optimizer removes it from pipelines.
pub struct Passthrough<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> Passthrough<T> {
    /// Create a passthrough with the default name.
    pub fn new() -> Self {
        Self::with_name("passthrough")
    }

    /// Create a passthrough with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Element> Default for Passthrough<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Operator for Passthrough<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<T, T>> {
        Ok(from_fn(|input, _ctrl| input.next()))
    }

    fn optimize(&self, filter: &Filter, order: EventOrder) -> OptimizeResult {
        OptimizeResult::remove(filter, order)
    }
}

// ============================================================================
// ReadLines
// ============================================================================

/// Splits a byte stream into lines, one event per line.
///
/// Every event has a single `line` field. Lines may span chunk boundaries;
/// a trailing line without newline is emitted once the input ends. Invalid
/// UTF-8 is replaced and reported as a warning.
pub struct ReadLines {
    schema: Arc<Schema>,
}

impl ReadLines {
    /// Create the operator.
    pub fn new() -> Self {
        Self {
            schema: Arc::new(Schema::new("line", ["line"])),
        }
    }
}

impl Default for ReadLines {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for ReadLines {
    type Input = Chunk;
    type Output = RecordBatch;

    fn name(&self) -> &str {
        "read_lines"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Chunk, RecordBatch>> {
        let schema = Arc::clone(&self.schema);
        let mut partial: Vec<u8> = Vec::new();
        let mut finished = false;
        Ok(from_fn::<Chunk, RecordBatch, _>(move |input, ctrl| {
            if finished {
                return Step::Done;
            }
            let mut rows = Vec::new();
            match input.next() {
                Step::Yield(chunk) => {
                    let mut bytes = chunk.as_bytes();
                    while let Some(end) = bytes.iter().position(|&b| b == b'\n') {
                        partial.extend_from_slice(&bytes[..end]);
                        rows.push(line_row(&partial, ctrl));
                        partial.clear();
                        bytes = &bytes[end + 1..];
                    }
                    partial.extend_from_slice(bytes);
                }
                Step::Pending => return Step::Pending,
                Step::Done => {
                    finished = true;
                    if partial.is_empty() {
                        return Step::Done;
                    }
                    rows.push(line_row(&partial, ctrl));
                    partial.clear();
                }
            }
            // An empty batch reads as "pending" to the node.
            Step::Yield(RecordBatch::new(Arc::clone(&schema), rows))
        }))
    }
}

fn line_row(line: &[u8], ctrl: &mut ControlPlane) -> Row {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.to_string(),
        Err(err) => {
            ctrl.warn(Error::unspecified(format!("invalid UTF-8 in line: {err}")));
            String::from_utf8_lossy(line).into_owned()
        }
    };
    vec![Value::from(text)]
}

// ============================================================================
// Sinks
// ============================================================================

/// The elements gathered by a [`Collect`] sink.
pub struct Collected<I> {
    items: Arc<Mutex<Vec<I>>>,
}

impl<I> Clone for Collected<I> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<I: Element> Collected<I> {
    /// Take everything collected so far.
    pub fn take(&self) -> Vec<I> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of elements collected so far.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was collected yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of the collected elements.
    pub fn size(&self) -> u64 {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Element::size)
            .sum()
    }
}

/// A sink that keeps every element it receives.
///
/// # Example
///
/// ```rust
/// use sluice::element::Chunk;
/// use sluice::operator::Collect;
///
/// let (sink, collected) = Collect::<Chunk>::new();
/// assert!(collected.is_empty());
/// ```
pub struct Collect<I> {
    items: Arc<Mutex<Vec<I>>>,
}

impl<I: Element> Collect<I> {
    /// Create the sink and the handle to its results.
    pub fn new() -> (Self, Collected<I>) {
        let items = Arc::new(Mutex::new(Vec::new()));
        let collected = Collected {
            items: Arc::clone(&items),
        };
        (Self { items }, collected)
    }
}

impl<I: Element> Operator for Collect<I> {
    type Input = I;
    type Output = Void;

    fn name(&self) -> &str {
        "collect"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<I, Void>> {
        let items = Arc::clone(&self.items);
        Ok(from_fn::<I, Void, _>(move |input, _ctrl| loop {
            match input.next() {
                Step::Yield(element) => items
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(element),
                Step::Pending => return Step::Pending,
                Step::Done => return Step::Done,
            }
        }))
    }
}

/// A sink that drops its input and counts it.
pub struct Discard<I> {
    consumed: Arc<AtomicU64>,
    _marker: PhantomData<fn(I)>,
}

impl<I: Element> Discard<I> {
    /// Create the sink.
    pub fn new() -> Self {
        Self {
            consumed: Arc::new(AtomicU64::new(0)),
            _marker: PhantomData,
        }
    }

    /// Counter of the consumed input size.
    pub fn consumed(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.consumed)
    }
}

impl<I: Element> Default for Discard<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Element> Operator for Discard<I> {
    type Input = I;
    type Output = Void;

    fn name(&self) -> &str {
        "discard"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<I, Void>> {
        let consumed = Arc::clone(&self.consumed);
        Ok(from_fn::<I, Void, _>(move |input, _ctrl| loop {
            match input.next() {
                Step::Yield(element) => {
                    consumed.fetch_add(element.size(), Ordering::Relaxed);
                }
                Step::Pending => return Step::Pending,
                Step::Done => return Step::Done,
            }
        }))
    }
}
