//! Linear pipelines of type-erased operators.

use crate::element::ElementKind;
use crate::error::{Error, Result};
use crate::operator::{AnyOperator, EventOrder, Filter, Operator};
use std::fmt;

/// An ordered chain of operators: a source, transforms, and a sink.
///
/// Element types are checked when the pipeline is validated; every node is
/// spawned with the concrete types of its operator.
///
/// # Example
///
/// ```rust
/// use sluice::element::Chunk;
/// use sluice::operator::{Discard, IterSource, Passthrough};
/// use sluice::pipeline::Pipeline;
///
/// let pipeline = Pipeline::new("example")
///     .then(IterSource::new("input", vec![Chunk::from("abc")]))
///     .then(Passthrough::<Chunk>::new())
///     .then(Discard::<Chunk>::new());
/// assert!(pipeline.validate().is_ok());
/// assert_eq!(pipeline.names(), ["input", "passthrough", "discard"]);
/// ```
pub struct Pipeline {
    name: String,
    operators: Vec<Box<dyn AnyOperator>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operators: Vec::new(),
        }
    }

    /// Append an operator.
    pub fn then<T: Operator>(mut self, operator: T) -> Self {
        self.push(operator);
        self
    }

    /// Append an operator.
    pub fn push<T: Operator>(&mut self, operator: T) {
        self.operators.push(Box::new(operator));
    }

    /// Append a type-erased operator.
    pub fn push_boxed(&mut self, operator: Box<dyn AnyOperator>) {
        self.operators.push(operator);
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether the pipeline has no operators.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Operator names in pipeline order.
    pub fn names(&self) -> Vec<&str> {
        self.operators.iter().map(|op| op.name()).collect()
    }

    /// Check that the pipeline is a closed, well-typed chain.
    pub fn validate(&self) -> Result<()> {
        let (Some(first), Some(last)) = (self.operators.first(), self.operators.last()) else {
            return Err(Error::logic(format!("pipeline '{}' is empty", self.name)));
        };
        if first.input_kind() != ElementKind::Void {
            return Err(Error::logic(format!(
                "pipeline '{}' must start with a source, but '{}' consumes {}",
                self.name,
                first.name(),
                first.input_kind()
            )));
        }
        if last.output_kind() != ElementKind::Void {
            return Err(Error::logic(format!(
                "pipeline '{}' must end with a sink, but '{}' produces {}",
                self.name,
                last.name(),
                last.output_kind()
            )));
        }
        for (index, op) in self.operators.iter().enumerate() {
            if op.input_kind() == ElementKind::Void && op.output_kind() == ElementKind::Void {
                return Err(Error::logic(format!(
                    "operator '{}' neither consumes nor produces elements",
                    op.name()
                )));
            }
            if index > 0 && op.input_kind() == ElementKind::Void {
                return Err(Error::logic(format!(
                    "source '{}' must be the first operator of pipeline '{}'",
                    op.name(),
                    self.name
                )));
            }
            if index + 1 < self.operators.len() && op.output_kind() == ElementKind::Void {
                return Err(Error::logic(format!(
                    "sink '{}' must be the last operator of pipeline '{}'",
                    op.name(),
                    self.name
                )));
            }
        }
        for pair in self.operators.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.output_kind() != next.input_kind() {
                return Err(Error::logic(format!(
                    "'{}' produces {} but '{}' consumes {}",
                    prev.name(),
                    prev.output_kind(),
                    next.name(),
                    next.input_kind()
                )));
            }
        }
        Ok(())
    }

    /// Run the optimizer from the sink towards the source.
    ///
    /// Each operator sees the filter and event order its successor needs
    /// and reports what it needs in turn. Operators that declare themselves
    /// removable and do not change the element type are dropped. Returns
    /// the filter and order left over for the source.
    pub fn optimize(&mut self) -> (Filter, EventOrder) {
        let mut filter = Filter::all();
        let mut order = EventOrder::Ordered;
        let operators = std::mem::take(&mut self.operators);
        let mut kept = Vec::with_capacity(operators.len());
        for op in operators.into_iter().rev() {
            let result = op.optimize(&filter, order);
            filter = result.filter.unwrap_or_default();
            order = result.order;
            if result.remove && op.input_kind() == op.output_kind() {
                tracing::debug!("pipeline '{}' removes operator '{}'", self.name, op.name());
                continue;
            }
            kept.push(op);
        }
        kept.reverse();
        self.operators = kept;
        (filter, order)
    }

    pub(crate) fn into_operators(self) -> Vec<Box<dyn AnyOperator>> {
        self.operators
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("operators", &self.names())
            .finish()
    }
}
