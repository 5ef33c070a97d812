//! Error types for Sluice.

use crate::diagnostics::Diagnostic;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using Sluice's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Sluice operations.
///
/// Errors are cheap to clone so that a single abort reason can be handed to
/// the caller, the liveness watch of the failing node and its metrics.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A caller violated the execution protocol (concurrent pull, pushing an
    /// empty batch, overflowing a buffer, pulling from a sink, ...).
    ///
    /// These indicate a bug in the caller and are never retried.
    #[error("logic error: {0}")]
    Logic(String),

    /// The pipeline was aborted and the reason was already reported
    /// elsewhere. Must be propagated, never reported again.
    #[error("aborted")]
    Silent,

    /// An error without further classification.
    #[error("{0}")]
    Unspecified(String),

    /// The receiver of a request terminated before it could be delivered.
    #[error("receiver down: {0}")]
    ReceiverDown(String),

    /// The receiver of a request terminated without responding.
    #[error("broken promise: {0}")]
    BrokenPromise(String),

    /// The previous execution node exited irregularly.
    #[error("previous execution node '{node}' exited: {source}")]
    Upstream {
        /// Name of the operator hosted by the previous node.
        node: String,
        /// The reason the previous node exited with.
        source: Box<Error>,
    },

    /// An operator raised an error through the diagnostics boundary.
    #[error("{0}")]
    Diagnostic(Box<Diagnostic>),

    /// I/O error raised by an operator.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Error {
    /// Create a logic error.
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }

    /// Create an unspecified error.
    pub fn unspecified(message: impl Into<String>) -> Self {
        Self::Unspecified(message.into())
    }

    /// Whether this error was already reported upstream.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Silent)
    }

    /// Whether this is a logic error.
    pub fn is_logic(&self) -> bool {
        matches!(self, Self::Logic(_))
    }

    /// Whether this error means the other side of a request is gone.
    ///
    /// Transport errors are treated as "peer gone" and are not fatal by
    /// themselves.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ReceiverDown(_) | Self::BrokenPromise(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<Diagnostic> for Error {
    fn from(diag: Diagnostic) -> Self {
        Self::Diagnostic(Box::new(diag))
    }
}
