//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters and histograms via `metrics-rs`, plus structured
//!   [`OperatorMetric`] records delivered through a kanal channel
//! - **Tracing**: structured logging and per-node spans via `tracing`
//!
//! ## Metrics
//!
//! Every execution node exposes the following metrics, labelled with
//! `pipeline` and `node`:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `sluice_elements_in` | Counter | Elements accepted via push |
//! | `sluice_elements_out` | Counter | Elements delivered downstream |
//! | `sluice_batches_in` | Counter | Batches accepted via push |
//! | `sluice_batches_out` | Counter | Batches delivered downstream |
//! | `sluice_approx_bytes_in` | Counter | Approximate bytes accepted |
//! | `sluice_approx_bytes_out` | Counter | Approximate bytes delivered |
//! | `sluice_run_time_ns` | Histogram | Duration of a single run |
//! | `sluice_node_aborts` | Counter | Nodes that aborted |
//!
//! If an [`ExecutorConfig`](crate::pipeline::ExecutorConfig) carries a
//! [`MetricsSender`], each node also sends an [`OperatorMetric`] snapshot
//! once per metrics interval and once when it terminates.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice::observability::{init_metrics, metrics_channel};
//! use sluice::pipeline::ExecutorConfig;
//!
//! init_metrics();
//! let (sender, receiver) = metrics_channel();
//! let config = ExecutorConfig::default().with_metrics(sender);
//! ```

mod metrics;
mod tracing_support;

pub(crate) use metrics::NodeMetrics;
pub use metrics::{
    MetricsReceiver, MetricsSender, OperatorMetric, init_metrics, metrics_channel,
};
pub use tracing_support::{TracingConfig, span_node, span_pipeline, trace_delivery, trace_pull};
