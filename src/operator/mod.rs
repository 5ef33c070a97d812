//! The operator contract.
//!
//! An [`Operator`] is a pluggable unit of pipeline logic. Execution nodes
//! host exactly one operator each and drive it through the pull-based demand
//! protocol:
//!
//! - a source has `Input = Void`
//! - a sink has `Output = Void`
//! - a transform has both
//!
//! When its node starts, the operator is instantiated once into a
//! [`Generator`]: a lazily advanced output sequence that is resumed step by
//! step with an [`InputAdapter`] over the node's inbound buffer and the
//! node's [`ControlPlane`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//!
//! struct Upper;
//!
//! impl Operator for Upper {
//!     type Input = Chunk;
//!     type Output = Chunk;
//!
//!     fn name(&self) -> &str {
//!         "upper"
//!     }
//!
//!     fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Chunk, Chunk>> {
//!         Ok(from_fn::<Chunk, Chunk, _>(|input, _ctrl| match input.next() {
//!             Step::Yield(chunk) => Step::Yield(Chunk::from(chunk.as_bytes().to_ascii_uppercase())),
//!             Step::Pending => Step::Pending,
//!             Step::Done => Step::Done,
//!         }))
//!     }
//! }
//! ```

mod builtin;
mod control;

pub use builtin::{Collect, Collected, Discard, IterSource, Passthrough, ReadLines};
pub use control::{ControlPlane, Wakeup};

pub use crate::exec::InputAdapter;

use crate::element::{Element, ElementKind};
use crate::error::Result;
use crate::exec::{DemandLimits, NodeHandle, SpawnContext};
use std::fmt;

// ============================================================================
// Step
// ============================================================================

/// The outcome of resuming a lazy sequence once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// One element was produced.
    Yield(T),
    /// Nothing is ready yet; resume again later.
    Pending,
    /// The sequence is exhausted.
    Done,
}

impl<T> Step<T> {
    /// Whether this is [`Step::Done`].
    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done)
    }

    /// Map the yielded value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Yield(value) => Step::Yield(f(value)),
            Step::Pending => Step::Pending,
            Step::Done => Step::Done,
        }
    }
}

// ============================================================================
// Generator
// ============================================================================

/// A lazily advanced output sequence.
///
/// Yielding an element of size zero is equivalent to [`Step::Pending`].
/// Sinks (`O = Void`) never yield; they consume from `input` and return
/// `Pending` until their input is exhausted.
pub trait Generator<I: Element, O: Element>: Send {
    /// Advance the sequence by one step.
    fn resume(&mut self, input: &mut InputAdapter<'_, I>, ctrl: &mut ControlPlane) -> Step<O>;
}

/// A boxed generator, as returned by [`Operator::instantiate`].
pub type BoxGenerator<I, O> = Box<dyn Generator<I, O>>;

/// Generator backed by a closure. See [`from_fn`].
pub struct FromFn<F>(F);

impl<I, O, F> Generator<I, O> for FromFn<F>
where
    I: Element,
    O: Element,
    F: FnMut(&mut InputAdapter<'_, I>, &mut ControlPlane) -> Step<O> + Send,
{
    fn resume(&mut self, input: &mut InputAdapter<'_, I>, ctrl: &mut ControlPlane) -> Step<O> {
        (self.0)(input, ctrl)
    }
}

/// Create a generator from a closure that is called once per step.
pub fn from_fn<I, O, F>(f: F) -> BoxGenerator<I, O>
where
    I: Element,
    O: Element,
    F: FnMut(&mut InputAdapter<'_, I>, &mut ControlPlane) -> Step<O> + Send + 'static,
{
    Box::new(FromFn(f))
}

/// Generator backed by an iterator. See [`from_iter`].
pub struct FromIter<T>(T);

impl<I, O, T> Generator<I, O> for FromIter<T>
where
    I: Element,
    O: Element,
    T: Iterator<Item = O> + Send,
{
    fn resume(&mut self, _input: &mut InputAdapter<'_, I>, _ctrl: &mut ControlPlane) -> Step<O> {
        match self.0.next() {
            Some(element) => Step::Yield(element),
            None => Step::Done,
        }
    }
}

/// Create a generator that yields every item of `iter` and ignores its input.
pub fn from_iter<I, O, T>(iter: T) -> BoxGenerator<I, O>
where
    I: Element,
    O: Element,
    T: IntoIterator<Item = O>,
    T::IntoIter: Send + 'static,
{
    Box::new(FromIter(iter.into_iter()))
}

// ============================================================================
// Placement and Optimization
// ============================================================================

/// Where an operator's execution node should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    /// In the process that starts the pipeline.
    Local,
    /// Inside a node service; requires a node handle in the executor config.
    Remote,
    /// Wherever the executor sees fit.
    #[default]
    Anywhere,
}

/// The ordering guarantee an operator requires from its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventOrder {
    /// Events must arrive in production order.
    #[default]
    Ordered,
    /// Only the order within a schema matters.
    Schema,
    /// Any order is fine.
    Unordered,
}

/// An opaque conjunction of predicates pushed down a pipeline.
///
/// The engine never evaluates filters; operators exchange them through
/// [`Operator::optimize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    conjuncts: Vec<String>,
}

impl Filter {
    /// The trivially true filter.
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter consisting of a single predicate.
    pub fn predicate(predicate: impl Into<String>) -> Self {
        Self {
            conjuncts: vec![predicate.into()],
        }
    }

    /// Conjunction of two filters.
    pub fn and(mut self, other: Filter) -> Self {
        for conjunct in other.conjuncts {
            if !self.conjuncts.contains(&conjunct) {
                self.conjuncts.push(conjunct);
            }
        }
        self
    }

    /// Whether this filter accepts everything.
    pub fn is_trivial(&self) -> bool {
        self.conjuncts.is_empty()
    }

    /// The predicates of this conjunction.
    pub fn conjuncts(&self) -> &[String] {
        &self.conjuncts
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conjuncts.is_empty() {
            return f.write_str("true");
        }
        f.write_str(&self.conjuncts.join(" and "))
    }
}

/// What an operator asks of its predecessor after optimization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeResult {
    /// Filter the predecessor may apply on the operator's behalf. `None`
    /// means the operator needs all of its input.
    pub filter: Option<Filter>,
    /// Order the operator requires from its input.
    pub order: EventOrder,
    /// Whether the operator can be removed from the pipeline.
    pub remove: bool,
}

impl OptimizeResult {
    /// Keep the operator and require ordered, unfiltered input.
    pub fn do_not_optimize() -> Self {
        Self {
            filter: None,
            order: EventOrder::Ordered,
            remove: false,
        }
    }

    /// Keep the operator and pass filter and order through unchanged.
    pub fn order_invariant(filter: &Filter, order: EventOrder) -> Self {
        Self {
            filter: Some(filter.clone()),
            order,
            remove: false,
        }
    }

    /// Remove the operator and pass filter and order through unchanged.
    pub fn remove(filter: &Filter, order: EventOrder) -> Self {
        Self {
            filter: Some(filter.clone()),
            order,
            remove: true,
        }
    }
}

// ============================================================================
// Operator
// ============================================================================

/// A pluggable unit of pipeline logic.
pub trait Operator: Send + 'static {
    /// Element type consumed; [`Void`](crate::element::Void) for sources.
    type Input: Element;

    /// Element type produced; [`Void`](crate::element::Void) for sinks.
    type Output: Element;

    /// Human-readable operator name.
    fn name(&self) -> &str;

    /// Create the output sequence. Called exactly once per node.
    ///
    /// Errors returned here, and aborts raised through `ctrl` while
    /// instantiating, fail the pipeline start.
    fn instantiate(
        &mut self,
        ctrl: &mut ControlPlane,
    ) -> Result<BoxGenerator<Self::Input, Self::Output>>;

    /// Where the execution node should run.
    fn location(&self) -> Location {
        Location::Anywhere
    }

    /// Whether the operator blocks internally and needs its own thread.
    fn detached(&self) -> bool {
        false
    }

    /// Demand limits overriding the executor's configuration.
    fn demand(&self) -> DemandSettings {
        DemandSettings::default()
    }

    /// Pushdown hint: given the filter and order the successor needs,
    /// return what this operator needs from its predecessor.
    fn optimize(&self, filter: &Filter, order: EventOrder) -> OptimizeResult {
        let _ = (filter, order);
        OptimizeResult::do_not_optimize()
    }
}

/// Per-operator overrides of the demand limits on its input side.
///
/// Unset fields fall back to the executor configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemandSettings {
    /// Override for the maximum inbound buffer size.
    pub max_buffered: Option<u64>,
    /// Override for the maximum pull size.
    pub max_batch_size: Option<u64>,
    /// Override for the minimum pull size.
    pub min_batch_size: Option<u64>,
    /// Override for the pull timeout.
    pub batch_timeout: Option<std::time::Duration>,
    /// Override for the maximum number of buffered input elements.
    pub max_batches: Option<usize>,
}

impl DemandSettings {
    /// Apply these overrides on top of `limits`.
    pub fn apply(&self, limits: DemandLimits) -> DemandLimits {
        DemandLimits::new(
            self.max_batch_size.unwrap_or(limits.max_batch_size),
            self.min_batch_size.unwrap_or(limits.min_batch_size),
            self.max_buffered.unwrap_or(limits.max_buffered),
            self.batch_timeout.unwrap_or(limits.batch_timeout),
        )
        .with_max_batches(self.max_batches.unwrap_or(limits.max_batches))
    }
}

// ============================================================================
// Type Erasure
// ============================================================================

/// An operator whose element types were erased.
///
/// Implemented for every [`Operator`]; pipelines store their operators
/// behind this trait and only recover the element types when spawning the
/// execution nodes.
pub trait AnyOperator: Send {
    /// Operator name.
    fn name(&self) -> &str;

    /// Kind of the input elements.
    fn input_kind(&self) -> ElementKind;

    /// Kind of the output elements.
    fn output_kind(&self) -> ElementKind;

    /// See [`Operator::location`].
    fn location(&self) -> Location;

    /// See [`Operator::detached`].
    fn detached(&self) -> bool;

    /// See [`Operator::optimize`].
    fn optimize(&self, filter: &Filter, order: EventOrder) -> OptimizeResult;

    /// Spawn an execution node hosting this operator.
    fn spawn(self: Box<Self>, ctx: SpawnContext) -> Result<NodeHandle>;
}

impl<T: Operator> AnyOperator for T {
    fn name(&self) -> &str {
        Operator::name(self)
    }

    fn input_kind(&self) -> ElementKind {
        T::Input::KIND
    }

    fn output_kind(&self) -> ElementKind {
        T::Output::KIND
    }

    fn location(&self) -> Location {
        Operator::location(self)
    }

    fn detached(&self) -> bool {
        Operator::detached(self)
    }

    fn optimize(&self, filter: &Filter, order: EventOrder) -> OptimizeResult {
        Operator::optimize(self, filter, order)
    }

    fn spawn(self: Box<Self>, ctx: SpawnContext) -> Result<NodeHandle> {
        crate::exec::spawn_exec_node::<T::Input, T::Output>(self, ctx)
    }
}
