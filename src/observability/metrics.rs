//! Metrics collection using metrics-rs, plus structured per-node records.

use metrics::{Counter, Histogram, Unit, counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const ELEMENTS_IN: &str = "sluice_elements_in";
const ELEMENTS_OUT: &str = "sluice_elements_out";
const BATCHES_IN: &str = "sluice_batches_in";
const BATCHES_OUT: &str = "sluice_batches_out";
const BYTES_IN: &str = "sluice_approx_bytes_in";
const BYTES_OUT: &str = "sluice_approx_bytes_out";
const RUN_TIME_NS: &str = "sluice_run_time_ns";
const NODE_ABORTS: &str = "sluice_node_aborts";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        ELEMENTS_IN,
        Unit::Count,
        "Elements (bytes or events) accepted by execution nodes"
    );
    metrics::describe_counter!(
        ELEMENTS_OUT,
        Unit::Count,
        "Elements (bytes or events) delivered by execution nodes"
    );
    metrics::describe_counter!(BATCHES_IN, Unit::Count, "Batches pushed into execution nodes");
    metrics::describe_counter!(
        BATCHES_OUT,
        Unit::Count,
        "Batches delivered by execution nodes"
    );
    metrics::describe_counter!(BYTES_IN, Unit::Bytes, "Approximate bytes accepted");
    metrics::describe_counter!(BYTES_OUT, Unit::Bytes, "Approximate bytes delivered");
    metrics::describe_histogram!(
        RUN_TIME_NS,
        Unit::Nanoseconds,
        "Time spent in a single run of an execution node"
    );
    metrics::describe_counter!(NODE_ABORTS, Unit::Count, "Execution nodes that aborted");
}

/// A snapshot of one execution node's counters and timings.
///
/// Element counts are expressed in the node's units (`inbound_unit` and
/// `outbound_unit`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorMetric {
    /// Position of the node in its pipeline.
    pub index: usize,
    /// Name of the hosted operator.
    pub name: String,
    /// Unit label of the input elements.
    pub inbound_unit: &'static str,
    /// Unit label of the output elements.
    pub outbound_unit: &'static str,
    /// Elements accepted via push.
    pub inbound_elements: u64,
    /// Batches accepted via push.
    pub inbound_batches: u64,
    /// Approximate bytes accepted via push.
    pub inbound_approx_bytes: u64,
    /// Elements delivered to the next node.
    pub outbound_elements: u64,
    /// Batches delivered to the next node.
    pub outbound_batches: u64,
    /// Approximate bytes delivered to the next node.
    pub outbound_approx_bytes: u64,
    /// Time between scheduling a run and executing it.
    pub time_scheduled: Duration,
    /// Time spent instantiating the operator and starting the chain.
    pub time_starting: Duration,
    /// Time spent resuming the operator's output sequence.
    pub time_processing: Duration,
    /// Time spent in the run loop.
    pub time_running: Duration,
    /// Time spent paused.
    pub time_paused: Duration,
    /// Time since the node was created.
    pub time_total: Duration,
    /// Inbound elements per second of total time.
    pub inbound_rate: f64,
    /// Outbound elements per second of total time.
    pub outbound_rate: f64,
}

/// Sender side of the structured metrics channel.
pub type MetricsSender = kanal::Sender<OperatorMetric>;

/// Receiver side of the structured metrics channel.
pub type MetricsReceiver = kanal::Receiver<OperatorMetric>;

/// Create an unbounded channel for [`OperatorMetric`] records.
pub fn metrics_channel() -> (MetricsSender, MetricsReceiver) {
    kanal::unbounded()
}

/// Metrics collector for a single execution node.
///
/// Keeps the structured [`OperatorMetric`] record up to date and mirrors
/// the counters into metrics-rs with pre-configured labels.
pub(crate) struct NodeMetrics {
    record: OperatorMetric,
    created: Instant,
    scheduled_at: Option<Instant>,
    paused_at: Option<Instant>,
    sender: Option<MetricsSender>,
    elements_in: Counter,
    elements_out: Counter,
    batches_in: Counter,
    batches_out: Counter,
    bytes_in: Counter,
    bytes_out: Counter,
    run_time: Histogram,
    aborts: Counter,
}

impl NodeMetrics {
    pub(crate) fn new(
        pipeline: &str,
        index: usize,
        name: &str,
        units: (&'static str, &'static str),
        sender: Option<MetricsSender>,
    ) -> Self {
        let node = format!("{index}:{name}");
        Self {
            record: OperatorMetric {
                index,
                name: name.to_string(),
                inbound_unit: units.0,
                outbound_unit: units.1,
                ..OperatorMetric::default()
            },
            created: Instant::now(),
            scheduled_at: None,
            paused_at: None,
            sender,
            elements_in: counter!(
                ELEMENTS_IN,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
            elements_out: counter!(
                ELEMENTS_OUT,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
            batches_in: counter!(
                BATCHES_IN,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
            batches_out: counter!(
                BATCHES_OUT,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
            bytes_in: counter!(
                BYTES_IN,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
            bytes_out: counter!(
                BYTES_OUT,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
            run_time: histogram!(
                RUN_TIME_NS,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
            aborts: counter!(
                NODE_ABORTS,
                "pipeline" => pipeline.to_string(),
                "node" => node.clone()
            ),
        }
    }

    /// Record a batch accepted via push.
    pub(crate) fn record_inbound(&mut self, elements: u64, approx_bytes: u64) {
        self.record.inbound_elements += elements;
        self.record.inbound_batches += 1;
        self.record.inbound_approx_bytes += approx_bytes;
        self.elements_in.increment(elements);
        self.batches_in.increment(1);
        self.bytes_in.increment(approx_bytes);
    }

    /// Record a batch delivered to the next node.
    pub(crate) fn record_outbound(&mut self, elements: u64, approx_bytes: u64) {
        self.record.outbound_elements += elements;
        self.record.outbound_batches += 1;
        self.record.outbound_approx_bytes += approx_bytes;
        self.elements_out.increment(elements);
        self.batches_out.increment(1);
        self.bytes_out.increment(approx_bytes);
    }

    pub(crate) fn record_starting(&mut self, elapsed: Duration) {
        self.record.time_starting += elapsed;
    }

    pub(crate) fn record_processing(&mut self, elapsed: Duration) {
        self.record.time_processing += elapsed;
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.increment(1);
    }

    /// Remember when a run was scheduled; repeated calls keep the first.
    pub(crate) fn run_scheduled(&mut self) {
        self.scheduled_at.get_or_insert_with(Instant::now);
    }

    /// Start timing a run.
    pub(crate) fn run_started(&mut self) -> Instant {
        let now = Instant::now();
        if let Some(scheduled_at) = self.scheduled_at.take() {
            self.record.time_scheduled += now - scheduled_at;
        }
        now
    }

    pub(crate) fn run_finished(&mut self, started: Instant) {
        let elapsed = started.elapsed();
        self.record.time_running += elapsed;
        self.run_time.record(elapsed.as_nanos() as f64);
    }

    pub(crate) fn paused(&mut self) {
        self.paused_at.get_or_insert_with(Instant::now);
    }

    pub(crate) fn resumed(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.record.time_paused += paused_at.elapsed();
        }
    }

    /// Current snapshot with total time and rates filled in.
    pub(crate) fn snapshot(&self) -> OperatorMetric {
        let mut record = self.record.clone();
        record.time_total = self.created.elapsed();
        if let Some(paused_at) = self.paused_at {
            record.time_paused += paused_at.elapsed();
        }
        let seconds = record.time_total.as_secs_f64();
        if seconds > 0.0 {
            record.inbound_rate = record.inbound_elements as f64 / seconds;
            record.outbound_rate = record.outbound_elements as f64 / seconds;
        }
        record
    }

    /// Send a snapshot to the metrics channel, if one is configured.
    pub(crate) fn emit(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.try_send(self.snapshot()).is_err() {
            tracing::trace!("metrics receiver for '{}' dropped", self.record.name);
        }
    }
}
