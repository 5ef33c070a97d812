//! The execution node: one task hosting one operator.
//!
//! A node processes its mailboxes sequentially and runs the operator only
//! from within its own event loop, so all buffers and demand bookkeeping
//! are owned by a single task and never shared.
//!
//! One run of the node:
//!
//! 1. once the operator is exhausted, shut down the predecessor and force
//!    the remaining output out; exit when nothing is left and every
//!    rejected pull was answered
//! 2. otherwise deliver buffered output if the outstanding demand is ready
//! 3. request more input if the inbound buffer has room
//! 4. advance the operator by up to `steps_per_run` steps
//! 5. decide whether and when to run again

use super::buffer::{Inbound, InputAdapter, Outbound};
use super::demand::{Demand, DemandLimits};
use super::handle::{
    Control, ExitStatus, NodeHandle, NodeStatus, PullHandle, PullRequest, PushHandle,
    PushRequest, PushResult, Rejected, monitor,
};
use super::SpawnContext;
use crate::defaults::{IDLE_BACKOFF_RATE, MAX_IDLE_BACKOFF, MIN_IDLE_BACKOFF};
use crate::diagnostics::{Diagnostic, NodeDiagnostics};
use crate::element::{Element, ElementKind};
use crate::error::{Error, Result};
use crate::observability::{NodeMetrics, trace_delivery, trace_pull};
use crate::operator::{BoxGenerator, ControlPlane, Operator, Step};
use crate::pipeline::EventSender;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// The receiving ends of a node's mailboxes.
pub(crate) struct Mailboxes<I, O> {
    control: mpsc::UnboundedReceiver<Control>,
    push: mpsc::UnboundedReceiver<PushRequest<I>>,
    pull: mpsc::UnboundedReceiver<PullRequest<O>>,
}

/// Strong senders keeping the weak handles of this node upgradable.
struct Senders<I, O> {
    _control: mpsc::UnboundedSender<Control>,
    _push: mpsc::UnboundedSender<PushRequest<I>>,
    _pull: mpsc::UnboundedSender<PullRequest<O>>,
}

/// The immediate predecessor.
struct Previous<I> {
    handle: NodeHandle,
    pull: PullHandle<I>,
    status: watch::Receiver<NodeStatus>,
}

/// Asynchronous work the node is waiting on.
enum Completion<O> {
    /// The predecessor answered a pull.
    Pulled(Result<()>),
    /// The successor answered a non-blocking delivery.
    Delivered(PushResult<O>),
    /// The predecessor chain answered a delegated start.
    ChainStarted {
        result: Result<()>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// A pull after exhaustion was answered empty.
    DemandRejected,
}

/// What advancing the operator achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Output was produced or input consumed.
    Progress,
    /// The operator waits for input that was not there yet.
    Stalled,
    /// The operator returned pending without waiting for input.
    Idle,
    /// No room for more output, or the operator aborted.
    Blocked,
}

pub(crate) struct ExecNode<I: Element, O: Element> {
    name: Arc<str>,
    op: Box<dyn Operator<Input = I, Output = O>>,
    generator: Option<BoxGenerator<I, O>>,
    exhausted: bool,
    started: bool,
    ctrl: ControlPlane,

    inbound_limits: DemandLimits,
    outbound_limits: DemandLimits,
    inbound: Inbound<I>,
    outbound: Outbound<O>,
    previous: Option<Previous<I>>,
    input_requested: bool,
    demand: Option<Demand<O>>,
    /// Pulls after exhaustion still waiting for their empty reply.
    rejected_pulls: usize,
    self_push: PushHandle<I>,
    pending: FuturesUnordered<BoxFuture<'static, Completion<O>>>,

    run_scheduled: bool,
    run_at: Option<Instant>,
    backoff: Duration,
    paused: bool,
    steps_per_run: usize,
    metrics_interval: Duration,
    trace_demand: bool,

    metrics: NodeMetrics,
    events: EventSender,
    status: watch::Sender<NodeStatus>,
    exit: Option<Option<Error>>,
    _senders: Senders<I, O>,
}

impl<I: Element, O: Element> ExecNode<I, O> {
    pub(crate) fn new(
        op: Box<dyn Operator<Input = I, Output = O>>,
        ctx: &SpawnContext,
    ) -> (Self, Mailboxes<I, O>, NodeHandle) {
        let name: Arc<str> = Arc::from(op.name());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (pull_tx, pull_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(NodeStatus::Running);

        let self_push = PushHandle::new(Arc::clone(&name), push_tx.downgrade());
        let handle = NodeHandle::new::<I, O>(
            Arc::clone(&name),
            ctx.index,
            control_tx.downgrade(),
            status_rx,
            self_push.clone(),
            PullHandle::new(Arc::clone(&name), pull_tx.downgrade()),
        );
        let ctrl = ControlPlane::new(
            Arc::clone(&name),
            NodeDiagnostics::new(Arc::clone(&ctx.diagnostics)),
            ctx.config.node.clone(),
            handle.clone(),
            control_tx.downgrade(),
        );
        let config = &ctx.config;
        let metrics = NodeMetrics::new(
            &ctx.pipeline,
            ctx.index,
            &name,
            (I::KIND.unit(), O::KIND.unit()),
            config.metrics.clone(),
        );

        let node = Self {
            inbound_limits: op.demand().apply(config.limits_for(I::KIND)),
            outbound_limits: config.limits_for(O::KIND),
            name,
            op,
            generator: None,
            exhausted: false,
            started: false,
            ctrl,
            inbound: Inbound::new(),
            outbound: Outbound::new(),
            previous: None,
            input_requested: false,
            demand: None,
            rejected_pulls: 0,
            self_push,
            pending: FuturesUnordered::new(),
            run_scheduled: false,
            run_at: None,
            backoff: MIN_IDLE_BACKOFF,
            paused: false,
            steps_per_run: config.steps_per_run.max(1),
            metrics_interval: config.metrics_interval.max(Duration::from_millis(1)),
            trace_demand: config.tracing.demand_events,
            metrics,
            events: ctx.events.clone(),
            status: status_tx,
            exit: None,
            _senders: Senders {
                _control: control_tx,
                _push: push_tx,
                _pull: pull_tx,
            },
        };
        let mailboxes = Mailboxes {
            control: control_rx,
            push: push_rx,
            pull: pull_rx,
        };
        (node, mailboxes, handle)
    }

    /// Run the node until it exits.
    pub(crate) async fn run(mut self, mut mailboxes: Mailboxes<I, O>) {
        tracing::debug!("exec-node '{}' spawned", self.name);
        let reason = self.event_loop(&mut mailboxes).await;
        self.terminate(reason);
    }

    async fn event_loop(&mut self, mailboxes: &mut Mailboxes<I, O>) -> Option<Error> {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.metrics_interval,
            self.metrics_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if let Some(reason) = self.exit_reason() {
                return reason;
            }
            tokio::select! {
                biased;
                Some(message) = mailboxes.control.recv() => self.handle_control(message),
                Some(request) = mailboxes.push.recv() => self.handle_push(request),
                Some(request) = mailboxes.pull.recv() => self.handle_pull(request),
                Some(completion) = self.pending.next(), if !self.pending.is_empty() => {
                    self.handle_completion(completion);
                }
                status = watch_previous(&mut self.previous) => {
                    self.handle_previous_exit(status, &mut mailboxes.push);
                }
                _ = tokio::task::yield_now(), if self.run_scheduled && self.started && !self.paused => {
                    self.run_scheduled = false;
                    self.run_once().await;
                }
                _ = sleep_until(self.run_at) => {
                    self.run_at = None;
                    self.schedule();
                }
                _ = ticker.tick() => self.metrics.emit(),
            }
        }
    }

    fn exit_reason(&mut self) -> Option<Option<Error>> {
        if let Some(err) = self.ctrl.aborted() {
            return Some(Some(err.clone()));
        }
        self.exit.take()
    }

    fn is_source(&self) -> bool {
        I::KIND == ElementKind::Void
    }

    fn is_sink(&self) -> bool {
        O::KIND == ElementKind::Void
    }

    /// The outbound buffer reached its size or element count bound.
    fn is_full(&self) -> bool {
        !self.is_sink()
            && (self.outbound.total() >= self.outbound_limits.max_buffered
                || self.outbound.len() >= self.outbound_limits.max_batches)
    }

    /// Exhausted with nothing left to deliver.
    fn rejects_demand(&self) -> bool {
        self.exhausted && self.outbound.is_drained()
    }

    fn schedule(&mut self) {
        if !self.run_scheduled {
            self.run_scheduled = true;
            self.metrics.run_scheduled();
        }
    }

    fn delay_run(&mut self, at: Instant) {
        self.run_at = Some(match self.run_at {
            Some(existing) => existing.min(at),
            None => at,
        });
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    fn handle_control(&mut self, message: Control) {
        match message {
            Control::Start { previous, reply } => self.handle_start(previous, reply),
            Control::Exit { reason } => {
                tracing::debug!("exec-node '{}' received exit request", self.name);
                self.exit = Some(reason.map(|_| Error::Silent));
            }
            Control::Wake => {
                self.ctrl.set_waiting(false);
                self.schedule();
            }
            Control::Pause => {
                if !self.paused {
                    self.paused = true;
                    self.metrics.paused();
                }
            }
            Control::Resume => {
                if self.paused {
                    self.paused = false;
                    self.metrics.resumed();
                }
                self.schedule();
            }
        }
    }

    fn handle_start(&mut self, mut previous: Vec<NodeHandle>, reply: oneshot::Sender<Result<()>>) {
        if self.generator.is_some() {
            let _ = reply.send(Err(Error::logic(format!(
                "exec-node '{}' was already started",
                self.name
            ))));
            return;
        }
        if self.is_source() {
            if !previous.is_empty() {
                let _ = reply.send(Err(Error::logic(format!(
                    "exec-node '{}' runs a source operator and must not have a previous exec-node",
                    self.name
                ))));
                return;
            }
        } else {
            let Some(handle) = previous.pop() else {
                let _ = reply.send(Err(Error::logic(format!(
                    "exec-node '{}' runs a non-source operator and must have a previous exec-node",
                    self.name
                ))));
                return;
            };
            match handle.pull_handle::<I>() {
                Ok(pull) => {
                    self.previous = Some(Previous {
                        status: handle.watch(),
                        pull,
                        handle,
                    });
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    return;
                }
            }
        }

        let begin = Instant::now();
        let result = self.op.instantiate(&mut self.ctrl);
        self.metrics.record_starting(begin.elapsed());
        let generator = match result {
            Ok(generator) => generator,
            Err(err) => {
                let _ = reply.send(Err(Error::unspecified(format!(
                    "exec-node '{}' failed to instantiate operator: {err}",
                    self.name
                ))));
                self.exit = Some(Some(Error::Silent));
                return;
            }
        };
        if let Some(err) = self.ctrl.aborted() {
            let _ = reply.send(Err(err.clone()));
            self.exit = Some(Some(Error::Silent));
            return;
        }
        self.generator = Some(generator);
        self.events.send_node_started(self.name.to_string());

        let Some(prev) = &self.previous else {
            tracing::debug!("exec-node '{}' started", self.name);
            self.started = true;
            let _ = reply.send(Ok(()));
            self.schedule();
            return;
        };
        let (chain_reply, chain_started) = oneshot::channel();
        if let Err(err) = prev.handle.send(Control::Start {
            previous,
            reply: chain_reply,
        }) {
            let _ = reply.send(Err(err));
            self.exit = Some(Some(Error::Silent));
            return;
        }
        tracing::debug!(
            "exec-node '{}' delegates start to '{}'",
            self.name,
            prev.handle.name()
        );
        let node = prev.handle.name().to_string();
        self.pending.push(
            async move {
                let result = chain_started.await.unwrap_or_else(|_| {
                    Err(Error::BrokenPromise(format!("execution node '{node}'")))
                });
                Completion::ChainStarted { result, reply }
            }
            .boxed(),
        );
        // Sinks wait for the whole chain, everything else can start pulling.
        if !self.is_sink() {
            self.started = true;
            self.schedule();
        }
    }

    // ------------------------------------------------------------------------
    // Demand protocol
    // ------------------------------------------------------------------------

    fn handle_push(&mut self, request: PushRequest<I>) {
        if self.is_source() {
            let error = Error::logic(format!(
                "exec-node '{}' runs a source operator and cannot accept input",
                self.name
            ));
            request.reject(error);
            return;
        }
        let PushRequest { batch, reply } = request;
        match self.inbound.push(batch, self.inbound_limits.max_buffered) {
            Ok((size, approx_bytes)) => {
                tracing::trace!("exec-node '{}' received {} {}", self.name, size, I::KIND.unit());
                self.metrics.record_inbound(size, approx_bytes);
                let _ = reply.send(Ok(()));
                self.schedule();
            }
            Err(rejected) => {
                tracing::debug!("exec-node '{}' rejected push: {}", self.name, rejected.error);
                let _ = reply.send(Err(rejected));
            }
        }
    }

    fn handle_pull(&mut self, request: PullRequest<O>) {
        if self.is_sink() {
            let _ = request.reply.send(Err(Error::logic(format!(
                "exec-node '{}' runs a sink operator and cannot be pulled from",
                self.name
            ))));
            return;
        }
        if self.demand.is_some() {
            let _ = request.reply.send(Err(Error::logic(format!(
                "exec-node '{}' received a concurrent pull request",
                self.name
            ))));
            return;
        }
        if self.rejects_demand() {
            tracing::trace!(
                "exec-node '{}' rejects demand after exhaustion for {:?}",
                self.name,
                request.timeout
            );
            self.rejected_pulls += 1;
            let PullRequest { timeout, reply, .. } = request;
            self.pending.push(
                async move {
                    tokio::time::sleep(timeout).await;
                    let _ = reply.send(Ok(()));
                    Completion::DemandRejected
                }
                .boxed(),
            );
            return;
        }
        tracing::trace!(
            "exec-node '{}' received demand for {} {}",
            self.name,
            request.batch_size,
            O::KIND.unit()
        );
        self.demand = Some(Demand {
            sink: request.sink,
            batch_size: request.batch_size,
            deadline: Instant::now() + request.timeout,
            reply: request.reply,
            ongoing: false,
        });
        self.schedule();
    }

    fn request_more_input(&mut self) {
        if self.is_source() || self.input_requested {
            return;
        }
        let Some(previous) = &self.previous else {
            return;
        };
        let Some(batch_size) = self
            .inbound_limits
            .next_request(self.inbound.size(), self.inbound.len())
        else {
            return;
        };
        if self.trace_demand {
            trace_pull(&self.name, batch_size);
        }
        match previous.pull.send(
            self.self_push.clone(),
            batch_size,
            self.inbound_limits.batch_timeout,
        ) {
            Ok(reply) => {
                self.input_requested = true;
                let node = previous.handle.name().to_string();
                self.pending.push(
                    async move {
                        Completion::Pulled(reply.await.unwrap_or_else(|_| {
                            Err(Error::BrokenPromise(format!("execution node '{node}'")))
                        }))
                    }
                    .boxed(),
                );
            }
            Err(err) => {
                tracing::debug!("exec-node '{}' failed to request input: {}", self.name, err);
            }
        }
    }

    fn handle_pulled(&mut self, result: Result<()>) {
        self.input_requested = false;
        self.schedule();
        let Err(err) = result else {
            return;
        };
        if err.is_transport() || err.is_silent() || self.previous.is_none() {
            return;
        }
        self.ctrl.emit(Diagnostic::warning(err.to_string()).with_note(format!(
            "`{}` failed to pull from previous execution node",
            self.name
        )));
    }

    async fn deliver(&mut self, now: Instant, force: bool) {
        let full = self.is_full();
        let Some(demand) = self.demand.as_mut() else {
            return;
        };
        if demand.ongoing {
            return;
        }
        let held = self.outbound.held();
        if !force && !demand.ready(held, full, self.exhausted, now) {
            return;
        }
        let amount = held.min(demand.batch_size);
        if amount == 0 {
            if let Some(demand) = self.demand.take() {
                demand.resolve(Ok(()));
            }
            self.schedule();
            return;
        }
        let blocking = force || full;
        let batch = self.outbound.take_front(amount);
        if self.trace_demand {
            trace_delivery(&self.name, amount, blocking);
        }
        demand.ongoing = true;
        let sink = demand.sink.clone();
        let reply = match sink.send(batch) {
            Ok(reply) => reply,
            Err(rejected) => {
                self.finish_delivery(Err(rejected));
                return;
            }
        };
        let node = sink.node().to_string();
        let reply = async move {
            reply.await.unwrap_or_else(|_| {
                Err(Rejected {
                    error: Error::BrokenPromise(format!("execution node '{node}'")),
                    batch: Vec::new(),
                })
            })
        };
        if blocking {
            let result = reply.await;
            self.finish_delivery(result);
        } else {
            self.pending.push(reply.map(Completion::Delivered).boxed());
        }
    }

    fn finish_delivery(&mut self, result: PushResult<O>) {
        let demand = self.demand.take();
        let result = match result {
            Ok(()) => {
                let (size, approx_bytes) = self.outbound.complete();
                self.metrics.record_outbound(size, approx_bytes);
                tracing::trace!("exec-node '{}' delivered {} {}", self.name, size, O::KIND.unit());
                Ok(())
            }
            Err(Rejected { error, batch }) => {
                tracing::debug!("exec-node '{}' failed to deliver: {}", self.name, error);
                self.outbound.restore(batch);
                Err(error)
            }
        };
        if let Some(demand) = demand {
            demand.resolve(result);
        }
        self.schedule();
    }

    fn handle_completion(&mut self, completion: Completion<O>) {
        match completion {
            Completion::Pulled(result) => self.handle_pulled(result),
            Completion::Delivered(result) => self.finish_delivery(result),
            Completion::ChainStarted { result, reply } => match result {
                Ok(()) => {
                    tracing::debug!("exec-node '{}' started", self.name);
                    if self.is_sink() {
                        self.started = true;
                        self.schedule();
                    }
                    let _ = reply.send(Ok(()));
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    self.exit = Some(Some(Error::Silent));
                }
            },
            Completion::DemandRejected => {
                self.rejected_pulls -= 1;
                if self.rejected_pulls > 0 {
                    return;
                }
                // Exit right away, before the successor can pull again.
                if self.demand.is_none() {
                    tracing::debug!("exec-node '{}' is exhausted", self.name);
                    self.exit = Some(None);
                } else {
                    self.schedule();
                }
            }
        }
    }

    fn handle_previous_exit(
        &mut self,
        status: ExitStatus,
        push: &mut mpsc::UnboundedReceiver<PushRequest<I>>,
    ) {
        // Pushes sent before the exit must not be lost.
        while let Ok(request) = push.try_recv() {
            self.handle_push(request);
        }
        let Some(previous) = self.previous.take() else {
            return;
        };
        self.input_requested = false;
        match status {
            ExitStatus::Normal => {
                tracing::debug!(
                    "exec-node '{}' saw previous exec-node '{}' finish",
                    self.name,
                    previous.handle.name()
                );
                self.schedule();
            }
            ExitStatus::Failed(err) => {
                tracing::debug!(
                    "exec-node '{}' shuts down after previous exec-node '{}' failed: {}",
                    self.name,
                    previous.handle.name(),
                    err
                );
                self.exit = Some(Some(Error::Silent));
            }
            ExitStatus::Vanished => {
                self.ctrl.abort(Error::Upstream {
                    node: previous.handle.name().to_string(),
                    source: Box::new(previous.handle.vanished()),
                });
            }
        }
    }

    fn shutdown_previous(&mut self) {
        if let Some(previous) = self.previous.take() {
            tracing::debug!(
                "exec-node '{}' shuts down previous exec-node '{}'",
                self.name,
                previous.handle.name()
            );
            previous.handle.exit(None);
        }
        self.input_requested = false;
    }

    // ------------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------------

    async fn run_once(&mut self) {
        let started = self.metrics.run_started();
        let now = Instant::now();
        if self.exhausted {
            self.shutdown_previous();
            if !self.is_sink() && !self.outbound.is_drained() {
                self.deliver(now, true).await;
            } else {
                if let Some(demand) = self.demand.take() {
                    demand.resolve(Ok(()));
                }
                if self.rejected_pulls == 0 {
                    tracing::debug!("exec-node '{}' is exhausted", self.name);
                    self.exit = Some(None);
                }
            }
        } else {
            self.deliver(now, false).await;
            self.request_more_input();
            let outcome = self.advance();
            if outcome == Outcome::Stalled {
                self.request_more_input();
            }
            self.reschedule(outcome, now);
        }
        self.metrics.run_finished(started);
    }

    fn advance(&mut self) -> Outcome {
        if self.generator.is_none() {
            return Outcome::Idle;
        }
        let mut progress = false;
        for _ in 0..self.steps_per_run {
            if self.is_full() {
                return if progress {
                    Outcome::Progress
                } else {
                    Outcome::Blocked
                };
            }
            let Some(generator) = self.generator.as_mut() else {
                return Outcome::Idle;
            };
            let begin = Instant::now();
            let mut input = InputAdapter::new(&mut self.inbound, self.previous.is_some());
            let step = generator.resume(&mut input, &mut self.ctrl);
            let consumed = input.consumed();
            let stalled = input.stalled();
            self.metrics.record_processing(begin.elapsed());
            if self.ctrl.aborted().is_some() {
                return Outcome::Blocked;
            }
            match step {
                Step::Yield(output) if output.size() > 0 => {
                    self.outbound.push(output);
                    progress = true;
                }
                Step::Done => {
                    tracing::debug!("exec-node '{}' operator completed", self.name);
                    self.exhausted = true;
                    return Outcome::Progress;
                }
                Step::Yield(_) | Step::Pending => {
                    if consumed > 0 {
                        progress = true;
                        continue;
                    }
                    return if progress {
                        Outcome::Progress
                    } else if stalled {
                        Outcome::Stalled
                    } else {
                        Outcome::Idle
                    };
                }
            }
        }
        Outcome::Progress
    }

    fn reschedule(&mut self, outcome: Outcome, now: Instant) {
        if self.exit.is_some() || self.ctrl.aborted().is_some() {
            return;
        }
        match outcome {
            Outcome::Progress => {
                self.backoff = MIN_IDLE_BACKOFF;
                if self.exhausted || self.demand.is_some() || !self.is_full() {
                    self.schedule();
                }
            }
            Outcome::Idle => {
                if !self.ctrl.is_waiting() {
                    self.delay_run(now + self.backoff);
                    self.backoff = self
                        .backoff
                        .mul_f64(IDLE_BACKOFF_RATE)
                        .min(MAX_IDLE_BACKOFF);
                }
            }
            Outcome::Stalled | Outcome::Blocked => {}
        }
        if let Some(demand) = &self.demand {
            if !demand.ongoing {
                let deadline = demand.deadline;
                self.delay_run(deadline);
            }
        }
    }

    fn terminate(mut self, reason: Option<Error>) {
        self.pending.clear();
        if let Some(previous) = self.previous.take() {
            previous.handle.exit(reason.as_ref().map(|_| Error::Silent));
        }
        match &reason {
            None => tracing::debug!("exec-node '{}' finished", self.name),
            Some(Error::Silent) => tracing::debug!("exec-node '{}' shut down", self.name),
            Some(err) => {
                tracing::error!("exec-node '{}' aborted: {}", self.name, err);
                self.metrics.record_abort();
            }
        }
        self.metrics.emit();
        let snapshot = self.metrics.snapshot();
        let elements = if self.is_sink() {
            snapshot.inbound_elements
        } else {
            snapshot.outbound_elements
        };
        self.events.send_node_finished(self.name.to_string(), elements);
        self.status.send_replace(NodeStatus::Exited(reason));
    }
}

async fn watch_previous<I>(previous: &mut Option<Previous<I>>) -> ExitStatus {
    match previous {
        Some(previous) => monitor(&mut previous.status).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
