//! Pipeline lifecycle events.
//!
//! The executor and the execution nodes of a pipeline share one broadcast
//! channel. Callers subscribe through the
//! [`PipelineHandle`](super::PipelineHandle).

use crate::error::{Error, Result};
use futures::stream::{BoxStream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;

/// Lifecycle notifications of a running pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Every execution node reported started.
    Started,

    /// An execution node instantiated its operator.
    NodeStarted {
        /// Name of the hosted operator.
        node: String,
    },

    /// An execution node terminated.
    NodeFinished {
        /// Name of the hosted operator.
        node: String,
        /// Size delivered downstream; consumed size for sinks.
        elements: u64,
    },

    /// An operator emitted a warning diagnostic.
    Warning {
        /// The diagnostic message.
        message: String,
        /// Emitting operator, if the warning came from a node.
        node: Option<String>,
    },

    /// The first error that ended the pipeline. Sent at most once.
    Error {
        /// The error message.
        message: String,
        /// Failing operator, if known.
        node: Option<String>,
    },

    /// Every node finished regularly.
    Eos,

    /// The caller aborted the pipeline.
    Stopped,
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::Started => f.write_str("pipeline started"),
            PipelineEvent::NodeStarted { node } => write!(f, "exec-node '{node}' started"),
            PipelineEvent::NodeFinished { node, elements } => {
                write!(f, "exec-node '{node}' finished after {elements} elements")
            }
            PipelineEvent::Warning { message, node: Some(node) } => {
                write!(f, "warning from '{node}': {message}")
            }
            PipelineEvent::Warning { message, node: None } => write!(f, "warning: {message}"),
            PipelineEvent::Error { message, node: Some(node) } => {
                write!(f, "error from '{node}': {message}")
            }
            PipelineEvent::Error { message, node: None } => write!(f, "error: {message}"),
            PipelineEvent::Eos => f.write_str("end of stream"),
            PipelineEvent::Stopped => f.write_str("pipeline aborted"),
        }
    }
}

/// Broadcasts [`PipelineEvent`]s.
///
/// Cloned into the executor and every execution node of one pipeline.
/// Sending never fails; events without subscribers are dropped.
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventSender {
    /// A channel keeping up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast `event` and return how many subscribers saw it.
    pub fn send(&self, event: PipelineEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Every node finished regularly.
    pub fn send_eos(&self) {
        self.send(PipelineEvent::Eos);
    }

    /// The pipeline failed, at `node` if known.
    pub fn send_error(&self, message: impl Into<String>, node: Option<String>) {
        self.send(PipelineEvent::Error {
            message: message.into(),
            node,
        });
    }

    /// A warning, from `node` if known.
    pub fn send_warning(&self, message: impl Into<String>, node: Option<String>) {
        self.send(PipelineEvent::Warning {
            message: message.into(),
            node,
        });
    }

    /// `node` instantiated its operator.
    pub fn send_node_started(&self, node: impl Into<String>) {
        self.send(PipelineEvent::NodeStarted { node: node.into() });
    }

    /// `node` terminated after `elements`.
    pub fn send_node_finished(&self, node: impl Into<String>, elements: u64) {
        self.send(PipelineEvent::NodeFinished {
            node: node.into(),
            elements,
        });
    }

    /// A receiver seeing every event sent from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receives [`PipelineEvent`]s.
///
/// A receiver that falls behind by more than the channel capacity skips
/// the oldest events.
pub struct EventReceiver {
    rx: broadcast::Receiver<PipelineEvent>,
}

impl EventReceiver {
    /// The next event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::trace!("event receiver skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next event if one is queued.
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                    return None;
                }
            }
        }
    }

    /// Wait until the pipeline ends.
    ///
    /// [`PipelineEvent::Eos`] yields `Ok(())`, [`PipelineEvent::Stopped`]
    /// yields [`Error::Silent`] and [`PipelineEvent::Error`] the reported
    /// failure. A channel closing before any of them is a broken promise.
    pub async fn wait_eos(&mut self) -> Result<()> {
        while let Some(event) = self.recv().await {
            match event {
                PipelineEvent::Eos => return Ok(()),
                PipelineEvent::Stopped => return Err(Error::Silent),
                PipelineEvent::Error { message, node: Some(node) } => {
                    return Err(Error::unspecified(format!("exec-node '{node}' failed: {message}")));
                }
                PipelineEvent::Error { message, node: None } => {
                    return Err(Error::unspecified(message));
                }
                PipelineEvent::Started
                | PipelineEvent::NodeStarted { .. }
                | PipelineEvent::NodeFinished { .. }
                | PipelineEvent::Warning { .. } => {}
            }
        }
        Err(Error::BrokenPromise("pipeline events".to_string()))
    }
}

/// An [`EventReceiver`] as a [`futures::Stream`]. Ends once every sender
/// is gone.
pub struct EventStream {
    inner: BoxStream<'static, PipelineEvent>,
}

impl EventStream {
    /// Wrap `receiver`.
    pub fn new(receiver: EventReceiver) -> Self {
        let inner = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        });
        Self {
            inner: inner.boxed(),
        }
    }
}

impl futures::Stream for EventStream {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_node_lifecycle_reaches_every_subscriber() {
        let events = EventSender::new(16);
        let mut first = events.subscribe();
        let mut second = events.subscribe();

        events.send_node_started("read_lines");
        events.send_node_finished("read_lines", 7);
        assert_eq!(events.send(PipelineEvent::Eos), 2);

        for receiver in [&mut first, &mut second] {
            assert!(matches!(receiver.recv().await, Some(PipelineEvent::NodeStarted { node }) if node == "read_lines"));
            assert!(matches!(receiver.recv().await, Some(PipelineEvent::NodeFinished { elements: 7, .. })));
            assert!(matches!(receiver.recv().await, Some(PipelineEvent::Eos)));
        }
    }

    #[test]
    fn test_send_without_subscribers() {
        let events = EventSender::new(4);
        assert_eq!(events.send(PipelineEvent::Started), 0);
    }

    #[tokio::test]
    async fn test_lagging_receiver_skips_oldest() {
        let events = EventSender::new(2);
        let mut receiver = events.subscribe();
        for node in ["a", "b", "c", "d"] {
            events.send_node_started(node);
        }
        assert!(matches!(receiver.try_recv(), Some(PipelineEvent::NodeStarted { node }) if node == "c"));
        assert!(matches!(receiver.recv().await, Some(PipelineEvent::NodeStarted { node }) if node == "d"));
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_wait_eos_outcomes() {
        let events = EventSender::new(16);
        let mut receiver = events.subscribe();
        events.send_warning("slow", Some("collect".to_string()));
        events.send_eos();
        receiver.wait_eos().await.unwrap();

        events.send_error("disk full", Some("collect".to_string()));
        let err = receiver.wait_eos().await.unwrap_err();
        assert_eq!(err.to_string(), "exec-node 'collect' failed: disk full");

        events.send(PipelineEvent::Stopped);
        assert!(receiver.wait_eos().await.unwrap_err().is_silent());

        drop(events);
        assert!(matches!(receiver.wait_eos().await, Err(Error::BrokenPromise(_))));
    }

    #[tokio::test]
    async fn test_event_stream_ends_with_senders() {
        let events = EventSender::new(16);
        let mut stream = EventStream::new(events.subscribe());
        events.send(PipelineEvent::Started);
        drop(events);
        assert!(matches!(stream.next().await, Some(PipelineEvent::Started)));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_event_display() {
        let event = PipelineEvent::Error {
            message: "bad chunk".to_string(),
            node: Some("fail_on".to_string()),
        };
        assert_eq!(event.to_string(), "error from 'fail_on': bad chunk");
        let event = PipelineEvent::NodeFinished {
            node: "collect".to_string(),
            elements: 3,
        };
        assert_eq!(event.to_string(), "exec-node 'collect' finished after 3 elements");
        assert_eq!(PipelineEvent::Stopped.to_string(), "pipeline aborted");
    }
}
