//! Handles to execution nodes.
//!
//! Nodes only ever hold weak handles to each other: a handle can send
//! requests into a node's mailboxes but never keeps the node alive. Liveness
//! is observed through a `watch` channel that every node updates exactly
//! once, when it exits.

use crate::element::{Element, ElementKind};
use crate::error::{Error, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

// ============================================================================
// Status
// ============================================================================

/// Liveness of an execution node.
#[derive(Debug, Clone)]
pub enum NodeStatus {
    /// The node task is alive.
    Running,
    /// The node exited; `None` is a regular exit.
    Exited(Option<Error>),
}

/// How a node went away, as observed by a monitor.
#[derive(Debug, Clone)]
pub(crate) enum ExitStatus {
    /// Exited regularly.
    Normal,
    /// Exited with an error.
    Failed(Error),
    /// The node task vanished without reporting (it panicked).
    Vanished,
}

/// Wait until the node behind `status` exits.
pub(crate) async fn monitor(status: &mut watch::Receiver<NodeStatus>) -> ExitStatus {
    loop {
        if let NodeStatus::Exited(reason) = &*status.borrow_and_update() {
            return match reason {
                None => ExitStatus::Normal,
                Some(err) => ExitStatus::Failed(err.clone()),
            };
        }
        if status.changed().await.is_err() {
            return match &*status.borrow() {
                NodeStatus::Exited(None) => ExitStatus::Normal,
                NodeStatus::Exited(Some(err)) => ExitStatus::Failed(err.clone()),
                NodeStatus::Running => ExitStatus::Vanished,
            };
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Messages of a node's control mailbox.
pub(crate) enum Control {
    /// Instantiate the operator and start the chain of predecessors.
    Start {
        previous: Vec<NodeHandle>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Terminate; `None` is a regular shutdown requested by the successor.
    Exit { reason: Option<Error> },
    /// Background work finished; resume the operator.
    Wake,
    /// Stop running the operator until resumed.
    Pause,
    /// Resume after a pause.
    Resume,
}

/// A push that was not accepted. The batch is handed back unchanged.
pub struct Rejected<I> {
    /// Why the push was rejected.
    pub error: Error,
    /// The batch that was pushed.
    pub batch: Vec<I>,
}

impl<I> fmt::Debug for Rejected<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("elements", &self.batch.len())
            .finish()
    }
}

/// Reply to a push request.
pub type PushResult<I> = std::result::Result<(), Rejected<I>>;

/// A batch pushed into a node, together with the reply channel.
pub struct PushRequest<I> {
    pub(crate) batch: Vec<I>,
    pub(crate) reply: oneshot::Sender<PushResult<I>>,
}

impl<I> PushRequest<I> {
    /// The pushed batch.
    pub fn batch(&self) -> &[I] {
        &self.batch
    }

    /// Accept the batch, replying success to the pusher.
    pub fn accept(self) -> Vec<I> {
        let _ = self.reply.send(Ok(()));
        self.batch
    }

    /// Reject the batch, handing it back to the pusher.
    pub fn reject(self, error: Error) {
        let _ = self.reply.send(Err(Rejected {
            error,
            batch: self.batch,
        }));
    }
}

/// A demand sent to a node.
pub(crate) struct PullRequest<O> {
    pub(crate) sink: PushHandle<O>,
    pub(crate) batch_size: u64,
    pub(crate) timeout: Duration,
    pub(crate) reply: oneshot::Sender<Result<()>>,
}

// ============================================================================
// Typed Handles
// ============================================================================

/// Sends batches into a node's inbound buffer.
pub struct PushHandle<I> {
    node: Arc<str>,
    tx: mpsc::WeakUnboundedSender<PushRequest<I>>,
}

impl<I> Clone for PushHandle<I> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            tx: self.tx.clone(),
        }
    }
}

impl<I> fmt::Debug for PushHandle<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushHandle")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

impl<I: Element> PushHandle<I> {
    pub(crate) fn new(node: Arc<str>, tx: mpsc::WeakUnboundedSender<PushRequest<I>>) -> Self {
        Self { node, tx }
    }

    /// Name of the receiving node.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Send a batch without waiting for the reply.
    pub(crate) fn send(
        &self,
        batch: Vec<I>,
    ) -> std::result::Result<oneshot::Receiver<PushResult<I>>, Rejected<I>> {
        let Some(tx) = self.tx.upgrade() else {
            return Err(Rejected {
                error: Error::ReceiverDown(format!("execution node '{}'", self.node)),
                batch,
            });
        };
        let (reply, rx) = oneshot::channel();
        match tx.send(PushRequest { batch, reply }) {
            Ok(()) => Ok(rx),
            Err(mpsc::error::SendError(request)) => Err(Rejected {
                error: Error::ReceiverDown(format!("execution node '{}'", self.node)),
                batch: request.batch,
            }),
        }
    }

    /// Push a batch and wait for the node to accept it.
    ///
    /// On rejection the batch is handed back inside [`Rejected`].
    pub async fn try_push(&self, batch: Vec<I>) -> PushResult<I> {
        let rx = self.send(batch)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Rejected {
                error: Error::BrokenPromise(format!("execution node '{}'", self.node)),
                batch: Vec::new(),
            }),
        }
    }

    /// Push a batch and wait for the node to accept it.
    pub async fn push(&self, batch: Vec<I>) -> Result<()> {
        self.try_push(batch).await.map_err(|rejected| rejected.error)
    }
}

/// Sends demand to a node.
pub struct PullHandle<O> {
    node: Arc<str>,
    tx: mpsc::WeakUnboundedSender<PullRequest<O>>,
}

impl<O> Clone for PullHandle<O> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            tx: self.tx.clone(),
        }
    }
}

impl<O> fmt::Debug for PullHandle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullHandle")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

impl<O: Element> PullHandle<O> {
    pub(crate) fn new(node: Arc<str>, tx: mpsc::WeakUnboundedSender<PullRequest<O>>) -> Self {
        Self { node, tx }
    }

    /// Name of the node pulled from.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Send a demand without waiting for the reply.
    pub(crate) fn send(
        &self,
        sink: PushHandle<O>,
        batch_size: u64,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        let down = || Error::ReceiverDown(format!("execution node '{}'", self.node));
        let tx = self.tx.upgrade().ok_or_else(down)?;
        let (reply, rx) = oneshot::channel();
        tx.send(PullRequest {
            sink,
            batch_size,
            timeout,
            reply,
        })
        .map_err(|_| down())?;
        Ok(rx)
    }

    /// Request up to `batch_size` elements to be pushed to `sink`.
    ///
    /// Completes once the node delivered the batch, which may be smaller
    /// than requested (or empty) if `timeout` passed first.
    pub async fn pull(&self, sink: PushHandle<O>, batch_size: u64, timeout: Duration) -> Result<()> {
        let rx = self.send(sink, batch_size, timeout)?;
        rx.await
            .map_err(|_| Error::BrokenPromise(format!("execution node '{}'", self.node)))?
    }
}

/// Receives the batches pushed through a standalone [`PushHandle`].
///
/// Used to drive a node by hand: pass the handle as the sink of a pull and
/// accept the pushed batches here.
pub struct PushReceiver<I> {
    rx: mpsc::UnboundedReceiver<PushRequest<I>>,
    // Keeps the weak handles upgradable.
    _tx: mpsc::UnboundedSender<PushRequest<I>>,
}

impl<I> PushReceiver<I> {
    /// Receive the next push request.
    pub async fn recv(&mut self) -> Option<PushRequest<I>> {
        self.rx.recv().await
    }

    /// Receive a push request if one is queued.
    pub fn try_recv(&mut self) -> Option<PushRequest<I>> {
        self.rx.try_recv().ok()
    }
}

/// Create a standalone push handle and its receiver.
pub fn push_channel<I: Element>(name: &str) -> (PushHandle<I>, PushReceiver<I>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = PushHandle::new(Arc::from(name), tx.downgrade());
    (handle, PushReceiver { rx, _tx: tx })
}

// ============================================================================
// Node Handle
// ============================================================================

/// A type-erased, non-owning handle to an execution node.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<NodeHandleInner>,
}

struct NodeHandleInner {
    name: Arc<str>,
    index: usize,
    input: ElementKind,
    output: ElementKind,
    control: mpsc::WeakUnboundedSender<Control>,
    status: watch::Receiver<NodeStatus>,
    push: Arc<dyn Any + Send + Sync>,
    pull: Arc<dyn Any + Send + Sync>,
}

impl NodeHandle {
    pub(crate) fn new<I: Element, O: Element>(
        name: Arc<str>,
        index: usize,
        control: mpsc::WeakUnboundedSender<Control>,
        status: watch::Receiver<NodeStatus>,
        push: PushHandle<I>,
        pull: PullHandle<O>,
    ) -> Self {
        Self {
            inner: Arc::new(NodeHandleInner {
                name,
                index,
                input: I::KIND,
                output: O::KIND,
                control,
                status,
                push: Arc::new(push),
                pull: Arc::new(pull),
            }),
        }
    }

    /// Name of the hosted operator.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Position in the pipeline.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Kind of the node's input.
    pub fn input_kind(&self) -> ElementKind {
        self.inner.input
    }

    /// Kind of the node's output.
    pub fn output_kind(&self) -> ElementKind {
        self.inner.output
    }

    /// Current liveness.
    pub fn status(&self) -> NodeStatus {
        self.inner.status.borrow().clone()
    }

    /// Whether the node is still running.
    pub fn is_running(&self) -> bool {
        matches!(*self.inner.status.borrow(), NodeStatus::Running)
    }

    /// Wait until the node exits and return its exit reason.
    pub async fn wait(&self) -> Option<Error> {
        match self.exit_status().await {
            ExitStatus::Normal => None,
            ExitStatus::Failed(err) => Some(err),
            ExitStatus::Vanished => Some(self.vanished()),
        }
    }

    pub(crate) async fn exit_status(&self) -> ExitStatus {
        let mut status = self.inner.status.clone();
        monitor(&mut status).await
    }

    pub(crate) fn watch(&self) -> watch::Receiver<NodeStatus> {
        self.inner.status.clone()
    }

    pub(crate) fn vanished(&self) -> Error {
        Error::unspecified(format!(
            "execution node '{}' terminated unexpectedly",
            self.inner.name
        ))
    }

    /// Typed handle for pushing into this node.
    ///
    /// Fails with a logic error if `I` is not the node's input type.
    pub fn push_handle<I: Element>(&self) -> Result<PushHandle<I>> {
        self.inner
            .push
            .downcast_ref::<PushHandle<I>>()
            .cloned()
            .ok_or_else(|| {
                Error::logic(format!(
                    "execution node '{}' consumes {}, not {}",
                    self.inner.name,
                    self.inner.input,
                    I::KIND
                ))
            })
    }

    /// Typed handle for pulling from this node.
    ///
    /// Fails with a logic error if `O` is not the node's output type.
    pub fn pull_handle<O: Element>(&self) -> Result<PullHandle<O>> {
        self.inner
            .pull
            .downcast_ref::<PullHandle<O>>()
            .cloned()
            .ok_or_else(|| {
                Error::logic(format!(
                    "execution node '{}' produces {}, not {}",
                    self.inner.name,
                    self.inner.output,
                    O::KIND
                ))
            })
    }

    pub(crate) fn send(&self, message: Control) -> Result<()> {
        let down = || Error::ReceiverDown(format!("execution node '{}'", self.inner.name));
        let control = self.inner.control.upgrade().ok_or_else(down)?;
        control.send(message).map_err(|_| down())
    }

    /// Start this node and, recursively, its predecessors.
    ///
    /// `previous` lists all nodes before this one, in pipeline order.
    pub async fn start(&self, previous: Vec<NodeHandle>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Start { previous, reply })?;
        rx.await
            .map_err(|_| Error::BrokenPromise(format!("execution node '{}'", self.inner.name)))?
    }

    /// Ask the node to exit. Returns `false` if it already terminated.
    pub fn exit(&self, reason: Option<Error>) -> bool {
        self.send(Control::Exit { reason }).is_ok()
    }

    /// Pause the node's run loop.
    pub fn pause(&self) -> bool {
        self.send(Control::Pause).is_ok()
    }

    /// Resume a paused node.
    pub fn resume(&self) -> bool {
        self.send(Control::Resume).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn detached_for_tests(name: &str) -> Self {
        use crate::element::Void;
        let name: Arc<str> = Arc::from(name);
        let (control, _) = mpsc::unbounded_channel::<Control>();
        let (_, status) = watch::channel(NodeStatus::Running);
        let (push, _) = mpsc::unbounded_channel::<PushRequest<Void>>();
        let (pull, _) = mpsc::unbounded_channel::<PullRequest<Void>>();
        Self::new::<Void, Void>(
            Arc::clone(&name),
            0,
            control.downgrade(),
            status,
            PushHandle::new(Arc::clone(&name), push.downgrade()),
            PullHandle::new(name, pull.downgrade()),
        )
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.inner.name)
            .field("index", &self.inner.index)
            .field("input", &self.inner.input)
            .field("output", &self.inner.output)
            .finish()
    }
}
