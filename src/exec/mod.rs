//! Execution nodes and the demand protocol.
//!
//! Every operator of a running pipeline is hosted by one execution node: an
//! independently scheduled Tokio task that owns the operator, its inbound
//! and outbound buffers and its demand bookkeeping. Adjacent nodes talk
//! through three mailboxes:
//!
//! - **push**: the previous node delivers a batch into the inbound buffer
//! - **pull**: the next node asks for up to `batch_size` elements, to be
//!   pushed to it before a deadline
//! - **control**: start, exit, wake-up, pause and resume
//!
//! At most one pull is outstanding between two nodes at any time, and each
//! node bounds both of its buffers by its [`DemandLimits`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice::exec::{self, push_channel};
//! use sluice::prelude::*;
//!
//! let source = exec::spawn(IterSource::new("numbers", chunks), &ExecutorConfig::default())?;
//! source.start(vec![]).await?;
//!
//! let (sink, mut pushed) = push_channel::<Chunk>("test");
//! let pull = source.pull_handle::<Chunk>()?;
//! tokio::spawn(async move { pull.pull(sink, 15, Duration::from_secs(1)).await });
//! let batch = pushed.recv().await.unwrap().accept();
//! ```

mod buffer;
mod demand;
mod handle;
mod node;

pub use buffer::InputAdapter;
pub use demand::DemandLimits;
pub use handle::{
    NodeHandle, NodeStatus, PullHandle, PushHandle, PushReceiver, PushRequest, PushResult,
    Rejected, push_channel,
};

pub(crate) use handle::Control;

use crate::diagnostics::{DiagnosticHandler, LogHandler};
use crate::element::{Element, ElementKind};
use crate::error::{Error, Result};
use crate::operator::{Location, Operator};
use crate::pipeline::{EventSender, ExecutorConfig};
use node::ExecNode;
use std::sync::Arc;
use tracing::Instrument;

#[cfg(test)]
pub(crate) fn buffer_for_tests<I: Element>(elements: Vec<I>) -> buffer::Inbound<I> {
    let mut inbound = buffer::Inbound::new();
    let _ = inbound.push(elements, u64::MAX);
    inbound
}

/// Everything a node needs from the pipeline that spawns it.
pub struct SpawnContext {
    pub(crate) pipeline: Arc<str>,
    pub(crate) index: usize,
    pub(crate) config: Arc<ExecutorConfig>,
    pub(crate) diagnostics: Arc<dyn DiagnosticHandler>,
    pub(crate) events: EventSender,
}

impl SpawnContext {
    pub(crate) fn new(
        pipeline: Arc<str>,
        index: usize,
        config: Arc<ExecutorConfig>,
        diagnostics: Arc<dyn DiagnosticHandler>,
        events: EventSender,
    ) -> Self {
        Self {
            pipeline,
            index,
            config,
            diagnostics,
            events,
        }
    }
}

/// Spawn a single execution node outside of a pipeline.
///
/// The node is not started; call [`NodeHandle::start`] with its
/// predecessors. Diagnostics go to the configured handler, or to the log.
pub fn spawn<T: Operator>(operator: T, config: &ExecutorConfig) -> Result<NodeHandle> {
    let diagnostics = config
        .diagnostics
        .clone()
        .unwrap_or_else(|| Arc::new(LogHandler));
    let ctx = SpawnContext::new(
        Arc::from("standalone"),
        0,
        Arc::new(config.clone()),
        diagnostics,
        EventSender::new(config.event_capacity),
    );
    spawn_exec_node::<T::Input, T::Output>(Box::new(operator), ctx)
}

/// Spawn the execution node for an operator with known element types.
pub(crate) fn spawn_exec_node<I: Element, O: Element>(
    operator: Box<dyn Operator<Input = I, Output = O>>,
    ctx: SpawnContext,
) -> Result<NodeHandle> {
    if I::KIND == ElementKind::Void && O::KIND == ElementKind::Void {
        return Err(Error::logic(format!(
            "operator '{}' neither consumes nor produces elements",
            operator.name()
        )));
    }
    if operator.location() == Location::Remote && ctx.config.node.is_none() {
        return Err(Error::logic(format!(
            "operator '{}' must run inside a node, but no node is configured",
            operator.name()
        )));
    }
    let detached = operator.detached();
    let span = ctx
        .config
        .tracing
        .node_span(&ctx.pipeline, ctx.index, operator.name());
    let (node, mailboxes, handle) = ExecNode::new(operator, &ctx);
    let task = node.run(mailboxes).instrument(span);
    if detached {
        let name = handle.name().to_string();
        std::thread::Builder::new()
            .name(format!("sluice.{name}"))
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(task),
                    Err(err) => {
                        tracing::error!("failed to create runtime for detached exec-node '{}': {}", name, err)
                    }
                }
            })?;
    } else {
        tokio::spawn(task);
    }
    Ok(handle)
}
