//! Diagnostics emitted by operators.
//!
//! Operators report problems through their [`ControlPlane`](crate::operator::ControlPlane)
//! rather than by returning errors from their output sequence. Every
//! diagnostic ends up at a [`DiagnosticHandler`] shared by the whole pipeline:
//!
//! - [`channel`]: forwards diagnostics into a kanal channel
//! - [`LogHandler`]: writes diagnostics to `tracing`
//!
//! Warnings are deduplicated per execution node, so an operator that warns
//! once per batch does not flood the handler.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The pipeline cannot continue.
    Error,
    /// Something went wrong but processing continues.
    Warning,
    /// Informational.
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Note => f.write_str("note"),
        }
    }
}

/// A structured message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    severity: Severity,
    message: String,
    notes: Vec<String>,
}

impl Diagnostic {
    /// Create a diagnostic.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// Create an error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Create a warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Attach a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Primary message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attached notes.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        for note in &self.notes {
            write!(f, " ({note})")?;
        }
        Ok(())
    }
}

/// Receives the diagnostics of a pipeline.
pub trait DiagnosticHandler: Send + Sync {
    /// Handle one diagnostic.
    fn emit(&self, diagnostic: Diagnostic);
}

impl<F> DiagnosticHandler for F
where
    F: Fn(Diagnostic) + Send + Sync,
{
    fn emit(&self, diagnostic: Diagnostic) {
        self(diagnostic)
    }
}

/// Forwards diagnostics into a kanal channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: kanal::Sender<Diagnostic>,
}

impl DiagnosticHandler for ChannelHandler {
    fn emit(&self, diagnostic: Diagnostic) {
        if self.sender.send(diagnostic).is_err() {
            tracing::trace!("diagnostics receiver dropped");
        }
    }
}

/// Create a handler that forwards every diagnostic to the returned receiver.
pub fn channel() -> (ChannelHandler, kanal::Receiver<Diagnostic>) {
    let (sender, receiver) = kanal::unbounded();
    (ChannelHandler { sender }, receiver)
}

/// Writes diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl DiagnosticHandler for LogHandler {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Error => tracing::error!("{}", diagnostic),
            Severity::Warning => tracing::warn!("{}", diagnostic),
            Severity::Note => tracing::info!("{}", diagnostic),
        }
    }
}

/// Per-node view on the pipeline's diagnostic handler.
pub(crate) struct NodeDiagnostics {
    handler: Arc<dyn DiagnosticHandler>,
    seen_warnings: HashSet<Diagnostic>,
}

impl NodeDiagnostics {
    pub(crate) fn new(handler: Arc<dyn DiagnosticHandler>) -> Self {
        Self {
            handler,
            seen_warnings: HashSet::new(),
        }
    }

    /// Emit a diagnostic, dropping warnings this node already emitted.
    pub(crate) fn emit(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity() == Severity::Warning
            && !self.seen_warnings.insert(diagnostic.clone())
        {
            return;
        }
        self.handler.emit(diagnostic);
    }

    pub(crate) fn handler(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_notes() {
        let diag = Diagnostic::error("boom").with_note("from `read_lines`");
        assert_eq!(diag.to_string(), "error: boom (from `read_lines`)");
    }

    #[test]
    fn test_channel_handler() {
        let (handler, receiver) = channel();
        handler.emit(Diagnostic::warning("careful"));
        let diag = receiver.try_recv().unwrap().unwrap();
        assert_eq!(diag.severity(), Severity::Warning);
        assert_eq!(diag.message(), "careful");
    }

    #[test]
    fn test_warnings_are_deduplicated() {
        let (handler, receiver) = channel();
        let mut node = NodeDiagnostics::new(Arc::new(handler));
        node.emit(Diagnostic::warning("same"));
        node.emit(Diagnostic::warning("same"));
        node.emit(Diagnostic::warning("other"));
        node.emit(Diagnostic::error("fatal"));
        node.emit(Diagnostic::error("fatal"));
        let mut messages = Vec::new();
        while let Ok(Some(diag)) = receiver.try_recv() {
            messages.push(diag.message().to_string());
        }
        assert_eq!(messages, ["same", "other", "fatal", "fatal"]);
    }

    #[test]
    fn test_closure_handler() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handler = move |_: Diagnostic| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        };
        handler.emit(Diagnostic::error("x"));
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
