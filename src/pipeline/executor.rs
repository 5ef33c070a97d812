//! Pipeline executor: spawns one execution node per operator and
//! supervises them until the pipeline finishes.

use crate::defaults::{EVENT_CHANNEL_CAPACITY, METRICS_INTERVAL, STEPS_PER_RUN};
use crate::diagnostics::{Diagnostic, DiagnosticHandler, LogHandler, Severity};
use crate::element::{Chunk, ElementKind, RecordBatch};
use crate::error::{Error, Result};
use crate::exec::{DemandLimits, NodeHandle, SpawnContext};
use crate::observability::{MetricsSender, TracingConfig};
use crate::pipeline::{EventReceiver, EventSender, Pipeline, PipelineEvent};
use futures::stream::{FuturesUnordered, StreamExt};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

// ============================================================================
// Configuration
// ============================================================================

/// Executor configuration.
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Demand limits for nodes exchanging byte chunks, in bytes.
    pub bytes: DemandLimits,

    /// Demand limits for nodes exchanging record batches, in rows.
    pub events: DemandLimits,

    /// Operator steps per run before a node yields to its mailboxes.
    pub steps_per_run: usize,

    /// How often every node reports an [`OperatorMetric`](crate::observability::OperatorMetric).
    pub metrics_interval: Duration,

    /// Capacity of the pipeline event channel.
    pub event_capacity: usize,

    /// Span and trace settings.
    pub tracing: TracingConfig,

    /// Receives warnings and errors. Defaults to logging them.
    pub diagnostics: Option<Arc<dyn DiagnosticHandler>>,

    /// Receives per-node metric snapshots.
    pub metrics: Option<MetricsSender>,

    /// The node service hosting remote operators.
    pub node: Option<Weak<dyn Any + Send + Sync>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            bytes: DemandLimits::of::<Chunk>(),
            events: DemandLimits::of::<RecordBatch>(),
            steps_per_run: STEPS_PER_RUN,
            metrics_interval: METRICS_INTERVAL,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            tracing: TracingConfig::default(),
            diagnostics: None,
            metrics: None,
            node: None,
        }
    }
}

impl ExecutorConfig {
    /// Create config with small batches and short timeouts.
    ///
    /// Trades throughput for latency: data moves as soon as a few elements
    /// are available.
    pub fn low_latency() -> Self {
        let timeout = Duration::from_millis(10);
        Self {
            bytes: DemandLimits::new(64 * 1024, 0, 256 * 1024, timeout),
            events: DemandLimits::new(1024, 0, 8 * 1024, timeout),
            steps_per_run: 8,
            ..Default::default()
        }
    }

    /// Create config with large batches and deep buffers.
    pub fn high_throughput() -> Self {
        Self {
            bytes: DemandLimits::new(4 << 20, 1 << 20, 16 << 20, Duration::from_secs(1)),
            events: DemandLimits::new(256 * 1024, 32 * 1024, 1024 * 1024, Duration::from_secs(1)),
            steps_per_run: 128,
            ..Default::default()
        }
    }

    /// Set the demand limits for byte chunks.
    pub fn with_bytes_limits(mut self, limits: DemandLimits) -> Self {
        self.bytes = limits;
        self
    }

    /// Set the demand limits for record batches.
    pub fn with_events_limits(mut self, limits: DemandLimits) -> Self {
        self.events = limits;
        self
    }

    /// Set the pull timeout for both element kinds.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.bytes.batch_timeout = timeout;
        self.events.batch_timeout = timeout;
        self
    }

    /// Set the operator steps per run.
    pub fn with_steps_per_run(mut self, steps: usize) -> Self {
        self.steps_per_run = steps;
        self
    }

    /// Set the metrics interval.
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set tracing behavior.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Send diagnostics to `handler`.
    pub fn with_diagnostics(mut self, handler: Arc<dyn DiagnosticHandler>) -> Self {
        self.diagnostics = Some(handler);
        self
    }

    /// Send metric snapshots to `sender`.
    pub fn with_metrics(mut self, sender: MetricsSender) -> Self {
        self.metrics = Some(sender);
        self
    }

    /// Run remote operators inside `node`.
    pub fn with_node(mut self, node: Weak<dyn Any + Send + Sync>) -> Self {
        self.node = Some(node);
        self
    }

    /// Limits for one element kind. Sources and sinks have no buffer on
    /// their `Void` side.
    pub fn limits_for(&self, kind: ElementKind) -> DemandLimits {
        match kind {
            ElementKind::Void => DemandLimits::new(0, 0, 0, Duration::ZERO),
            ElementKind::Bytes => self.bytes,
            ElementKind::Events => self.events,
        }
    }
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("bytes", &self.bytes)
            .field("events", &self.events)
            .field("steps_per_run", &self.steps_per_run)
            .field("metrics_interval", &self.metrics_interval)
            .field("event_capacity", &self.event_capacity)
            .field("tracing", &self.tracing)
            .field("diagnostics", &self.diagnostics.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("node", &self.node.is_some())
            .finish()
    }
}

/// Forwards warnings to the event channel before handing them on.
struct EventForwarder {
    events: EventSender,
    inner: Arc<dyn DiagnosticHandler>,
}

impl DiagnosticHandler for EventForwarder {
    fn emit(&self, diagnostic: Diagnostic) {
        if diagnostic.severity() == Severity::Warning {
            self.events.send_warning(diagnostic.to_string(), None);
        }
        self.inner.emit(diagnostic);
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to a running pipeline.
pub struct PipelineHandle {
    name: Arc<str>,
    nodes: Vec<NodeHandle>,
    supervisor: JoinHandle<Result<()>>,
    events: EventSender,
    initial: Option<EventReceiver>,
}

impl PipelineHandle {
    /// Wait for the pipeline to complete.
    ///
    /// Returns the first error a node failed with, [`Error::Silent`] if the
    /// pipeline was aborted without one, and `Ok(())` once every node
    /// finished regularly.
    pub async fn wait(self) -> Result<()> {
        match self.supervisor.await {
            Ok(result) => result,
            Err(err) => Err(Error::unspecified(format!(
                "supervisor of pipeline '{}' failed: {err}",
                self.name
            ))),
        }
    }

    /// Abort the pipeline. Every node shuts down silently.
    pub fn abort(&self) {
        tracing::info!("pipeline '{}' aborted", self.name);
        for node in &self.nodes {
            node.exit(Some(Error::Silent));
        }
        self.events.send(PipelineEvent::Stopped);
    }

    /// Pause every node.
    pub fn pause(&self) {
        for node in &self.nodes {
            node.pause();
        }
    }

    /// Resume every node.
    pub fn resume(&self) {
        for node in &self.nodes {
            node.resume();
        }
    }

    /// Subscribe to pipeline events from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The receiver subscribed before the pipeline started, which has seen
    /// every event. Returns `None` after the first call.
    pub fn events(&mut self) -> Option<EventReceiver> {
        self.initial.take()
    }

    /// Handles to the execution nodes, in pipeline order.
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Executor that runs pipelines.
pub struct PipelineExecutor {
    config: ExecutorConfig,
}

impl PipelineExecutor {
    /// Create a new executor with default configuration.
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
        }
    }

    /// Create an executor with custom configuration.
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the pipeline to completion.
    pub async fn run(&self, pipeline: Pipeline) -> Result<()> {
        let handle = self.start(pipeline).await?;
        handle.wait().await
    }

    /// Start the pipeline and return a handle.
    ///
    /// Spawns one execution node per operator and starts the sink, which
    /// starts its predecessors in turn. Returns once every node was
    /// instantiated.
    pub async fn start(&self, pipeline: Pipeline) -> Result<PipelineHandle> {
        pipeline.validate()?;
        let span = self.config.tracing.pipeline_span(pipeline.name());
        self.start_validated(pipeline, span.clone())
            .instrument(span)
            .await
    }

    async fn start_validated(&self, pipeline: Pipeline, span: tracing::Span) -> Result<PipelineHandle> {
        let name: Arc<str> = Arc::from(pipeline.name());
        let events = EventSender::new(self.config.event_capacity);
        let initial = events.subscribe();
        let config = Arc::new(self.config.clone());
        let diagnostics: Arc<dyn DiagnosticHandler> = Arc::new(EventForwarder {
            events: events.clone(),
            inner: config
                .diagnostics
                .clone()
                .unwrap_or_else(|| Arc::new(LogHandler)),
        });

        let operators = pipeline.into_operators();
        let mut nodes = Vec::with_capacity(operators.len());
        for (index, op) in operators.into_iter().enumerate() {
            let ctx = SpawnContext::new(
                Arc::clone(&name),
                index,
                Arc::clone(&config),
                Arc::clone(&diagnostics),
                events.clone(),
            );
            match op.spawn(ctx) {
                Ok(node) => nodes.push(node),
                Err(err) => {
                    shutdown(&nodes);
                    return Err(err);
                }
            }
        }

        let Some((sink, previous)) = nodes.split_last() else {
            return Err(Error::logic(format!("pipeline '{}' is empty", name)));
        };
        tracing::debug!("pipeline '{}' starts {} exec-nodes", name, nodes.len());
        if let Err(err) = sink.start(previous.to_vec()).await {
            tracing::debug!("pipeline '{}' failed to start: {}", name, err);
            shutdown(&nodes);
            events.send_error(err.to_string(), None);
            return Err(err);
        }
        events.send(PipelineEvent::Started);
        tracing::info!("pipeline '{}' started", name);

        let supervisor = tokio::spawn(
            supervise(Arc::clone(&name), nodes.clone(), events.clone()).instrument(span),
        );
        Ok(PipelineHandle {
            name,
            nodes,
            supervisor,
            events,
            initial: Some(initial),
        })
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn shutdown(nodes: &[NodeHandle]) {
    for node in nodes {
        node.exit(Some(Error::Silent));
    }
}

/// Wait for every node to exit. The first failure shuts down the rest.
async fn supervise(name: Arc<str>, nodes: Vec<NodeHandle>, events: EventSender) -> Result<()> {
    let mut exits: FuturesUnordered<_> = nodes
        .iter()
        .map(|node| async move { (node, node.wait().await) })
        .collect();
    let mut aborted = false;
    let mut first_error: Option<Error> = None;
    while let Some((node, reason)) = exits.next().await {
        let Some(err) = reason else {
            continue;
        };
        if !aborted {
            aborted = true;
            shutdown(&nodes);
        }
        if !err.is_silent() && first_error.is_none() {
            events.send_error(err.to_string(), Some(node.name().to_string()));
            first_error = Some(err);
        }
    }
    match first_error {
        Some(err) => {
            tracing::error!("pipeline '{}' failed: {}", name, err);
            Err(err)
        }
        None if aborted => {
            tracing::debug!("pipeline '{}' shut down", name);
            Err(Error::Silent)
        }
        None => {
            tracing::info!("pipeline '{}' finished", name);
            events.send_eos();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Void;
    use crate::operator::{Collect, IterSource, Location, Operator};
    use crate::operator::{BoxGenerator, ControlPlane};

    #[test]
    fn test_limits_for_kinds() {
        let config = ExecutorConfig::default();
        assert_eq!(config.limits_for(ElementKind::Bytes), DemandLimits::of::<Chunk>());
        assert_eq!(config.limits_for(ElementKind::Events).max_buffered, 254 * 1024);
        assert_eq!(config.limits_for(ElementKind::Void).max_buffered, 0);
    }

    #[test]
    fn test_builders() {
        let config = ExecutorConfig::low_latency()
            .with_batch_timeout(Duration::from_millis(5))
            .with_steps_per_run(4)
            .with_event_capacity(8);
        assert_eq!(config.bytes.batch_timeout, Duration::from_millis(5));
        assert_eq!(config.events.batch_timeout, Duration::from_millis(5));
        assert_eq!(config.steps_per_run, 4);
        assert!(ExecutorConfig::high_throughput().bytes.max_buffered > config.bytes.max_buffered);
        assert!(format!("{:?}", config).contains("diagnostics: false"));
    }

    struct RemoteSource;

    impl Operator for RemoteSource {
        type Input = Void;
        type Output = Chunk;

        fn name(&self) -> &str {
            "remote"
        }

        fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Void, Chunk>> {
            Ok(crate::operator::from_iter(Vec::new()))
        }

        fn location(&self) -> Location {
            Location::Remote
        }
    }

    #[tokio::test]
    async fn test_remote_operator_requires_node() {
        let (sink, _) = Collect::<Chunk>::new();
        let pipeline = Pipeline::new("remote").then(RemoteSource).then(sink);
        let err = PipelineExecutor::new().run(pipeline).await.unwrap_err();
        assert!(err.is_logic());
        assert!(err.to_string().contains("must run inside a node"));
    }

    #[tokio::test]
    async fn test_remote_operator_with_node() {
        let service: Arc<dyn Any + Send + Sync> = Arc::new(());
        let config = ExecutorConfig::default().with_node(Arc::downgrade(&service));
        let (sink, collected) = Collect::<Chunk>::new();
        let pipeline = Pipeline::new("remote").then(RemoteSource).then(sink);
        PipelineExecutor::with_config(config).run(pipeline).await.unwrap();
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn test_events_see_the_whole_run() {
        let (sink, _) = Collect::<Chunk>::new();
        let pipeline = Pipeline::new("events")
            .then(IterSource::new("input", vec![Chunk::from("abc")]))
            .then(sink);
        let mut handle = PipelineExecutor::new().start(pipeline).await.unwrap();
        let mut events = handle.events().unwrap();
        assert!(handle.events().is_none());
        handle.wait().await.unwrap();

        let mut started = 0;
        let mut finished = Vec::new();
        let mut eos = false;
        while let Some(event) = events.try_recv() {
            match event {
                PipelineEvent::NodeStarted { .. } => started += 1,
                PipelineEvent::NodeFinished { node, elements } => finished.push((node, elements)),
                PipelineEvent::Eos => eos = true,
                _ => {}
            }
        }
        assert_eq!(started, 2);
        finished.sort();
        assert_eq!(finished, [("collect".to_string(), 3), ("input".to_string(), 3)]);
        assert!(eos);
    }
}
