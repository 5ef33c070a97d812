//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to create a span around pipeline startup and supervision.
    pub pipeline_spans: bool,
    /// Whether every execution node runs inside its own span.
    pub node_spans: bool,
    /// Whether to log every delivery and pull at trace level.
    pub demand_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            pipeline_spans: true,
            node_spans: true,
            demand_events: false, // Can be expensive
        }
    }
}

impl TracingConfig {
    /// Create a new tracing config with everything enabled.
    pub fn all() -> Self {
        Self {
            pipeline_spans: true,
            node_spans: true,
            demand_events: true,
        }
    }

    /// Create a minimal config (pipeline spans only).
    pub fn minimal() -> Self {
        Self {
            pipeline_spans: true,
            node_spans: false,
            demand_events: false,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            pipeline_spans: false,
            node_spans: false,
            demand_events: false,
        }
    }

    /// Span for a pipeline, or a disabled span if pipeline spans are off.
    pub fn pipeline_span(&self, name: &str) -> Span {
        if self.pipeline_spans {
            span_pipeline(name)
        } else {
            Span::none()
        }
    }

    /// Span for an execution node, or a disabled span if node spans are off.
    pub fn node_span(&self, pipeline: &str, index: usize, operator: &str) -> Span {
        if self.node_spans {
            span_node(pipeline, index, operator)
        } else {
            Span::none()
        }
    }
}

/// Create a span for pipeline execution.
///
/// # Example
///
/// ```rust,ignore
/// use sluice::observability::span_pipeline;
///
/// let span = span_pipeline("my-pipeline");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_pipeline(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Create a span for an execution node.
///
/// # Example
///
/// ```rust,ignore
/// use sluice::observability::span_node;
///
/// let span = span_node("my-pipeline", 1, "read_lines");
/// ```
#[inline]
pub fn span_node(pipeline: &str, index: usize, operator: &str) -> Span {
    span!(
        Level::DEBUG,
        "exec-node",
        pipeline = %pipeline,
        index = index,
        operator = %operator
    )
}

/// Log a delivery to the next execution node.
#[inline]
pub fn trace_delivery(operator: &str, size: u64, forced: bool) {
    tracing::trace!(operator = %operator, size = size, forced = forced, "delivering batch");
}

/// Log a pull request issued to the previous execution node.
#[inline]
pub fn trace_pull(operator: &str, batch_size: u64) {
    tracing::trace!(operator = %operator, batch_size = batch_size, "requesting input");
}
