//! The control plane: an operator's escape hatch to its execution node.

use crate::diagnostics::{Diagnostic, DiagnosticHandler, NodeDiagnostics};
use crate::error::Error;
use crate::exec::{Control, NodeHandle};
use std::any::Any;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Handle passed to an operator while it is instantiated and resumed.
///
/// All state lives on the node's task; the control plane never crosses
/// threads. Background work that needs to resume the node uses a
/// [`Wakeup`] handle instead.
pub struct ControlPlane {
    operator: Arc<str>,
    diagnostics: NodeDiagnostics,
    abort: Option<Error>,
    waiting: bool,
    node: Option<Weak<dyn Any + Send + Sync>>,
    self_handle: NodeHandle,
    control: mpsc::WeakUnboundedSender<Control>,
}

impl ControlPlane {
    pub(crate) fn new(
        operator: Arc<str>,
        diagnostics: NodeDiagnostics,
        node: Option<Weak<dyn Any + Send + Sync>>,
        self_handle: NodeHandle,
        control: mpsc::WeakUnboundedSender<Control>,
    ) -> Self {
        Self {
            operator,
            diagnostics,
            abort: None,
            waiting: false,
            node,
            self_handle,
            control,
        }
    }

    /// Name of the operator this control plane belongs to.
    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Mark the operator as blocked on an external event.
    ///
    /// While waiting, the node does not resume the operator on its own. A
    /// [`Wakeup`] clears the flag and schedules a run.
    pub fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    /// Whether the operator is blocked on an external event.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Abort the pipeline.
    ///
    /// The first call wins; later calls are no-ops. Unless the error is
    /// [`Error::Silent`], an error diagnostic is emitted for it.
    pub fn abort(&mut self, error: impl Into<Error>) {
        if self.abort.is_some() {
            return;
        }
        let error = error.into();
        if !error.is_silent() {
            let diagnostic = match &error {
                Error::Diagnostic(diagnostic) => (**diagnostic).clone(),
                other => Diagnostic::error(other.to_string()),
            };
            self.diagnostics
                .emit(diagnostic.with_note(format!("from `{}`", self.operator)));
        }
        tracing::debug!("exec-node '{}' aborts: {}", self.operator, error);
        self.abort = Some(error);
    }

    /// Emit a warning; never aborts.
    pub fn warn(&mut self, error: impl Into<Error>) {
        let error = error.into();
        let diagnostic = match error {
            Error::Diagnostic(diagnostic) => Diagnostic::warning(diagnostic.message()),
            other => Diagnostic::warning(other.to_string()),
        };
        self.diagnostics
            .emit(diagnostic.with_note(format!("from `{}`", self.operator)));
    }

    /// Emit a diagnostic. Error diagnostics abort the pipeline.
    pub fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            crate::diagnostics::Severity::Error => self.abort(diagnostic),
            _ => self.diagnostics.emit(diagnostic),
        }
    }

    /// The pipeline's diagnostics handler.
    ///
    /// Diagnostics sent here directly bypass abort escalation and
    /// deduplication; prefer [`ControlPlane::emit`].
    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticHandler> {
        self.diagnostics.handler()
    }

    /// The hosting node service, if one is configured and still alive.
    pub fn node(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.node.as_ref().and_then(Weak::upgrade)
    }

    /// Handle to the execution node running this operator.
    pub fn self_handle(&self) -> &NodeHandle {
        &self.self_handle
    }

    /// A handle that resumes this node from another task or thread.
    pub fn wakeup(&self) -> Wakeup {
        Wakeup {
            control: self.control.clone(),
        }
    }

    /// The first abort reason, if the operator aborted.
    pub fn aborted(&self) -> Option<&Error> {
        self.abort.as_ref()
    }
}

/// Resumes a waiting execution node.
///
/// Cheap to clone and safe to move into background threads: waking only
/// sends a message into the node's control mailbox.
#[derive(Clone)]
pub struct Wakeup {
    control: mpsc::WeakUnboundedSender<Control>,
}

impl Wakeup {
    /// Wake the node. Returns `false` if the node has terminated.
    pub fn wake(&self) -> bool {
        match self.control.upgrade() {
            Some(control) => control.send(Control::Wake).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wakeup").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{self, Severity};
    use crate::exec::NodeHandle;

    fn control_plane() -> (
        ControlPlane,
        kanal::Receiver<Diagnostic>,
        mpsc::UnboundedReceiver<Control>,
        mpsc::UnboundedSender<Control>,
    ) {
        let (handler, receiver) = diagnostics::channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let ctrl = ControlPlane::new(
            Arc::from("test_op"),
            NodeDiagnostics::new(Arc::new(handler)),
            None,
            NodeHandle::detached_for_tests("test_op"),
            tx.downgrade(),
        );
        (ctrl, receiver, rx, tx)
    }

    #[test]
    fn test_abort_is_idempotent() {
        let (mut ctrl, diagnostics, _rx, _tx) = control_plane();
        ctrl.abort(Error::unspecified("first"));
        ctrl.abort(Error::unspecified("second"));
        assert_eq!(ctrl.aborted().unwrap().to_string(), "first");

        let diag = diagnostics.try_recv().unwrap().unwrap();
        assert_eq!(diag.severity(), Severity::Error);
        assert_eq!(diag.message(), "first");
        assert_eq!(diag.notes(), ["from `test_op`"]);
        assert!(diagnostics.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_silent_abort_is_not_reported() {
        let (mut ctrl, diagnostics, _rx, _tx) = control_plane();
        ctrl.abort(Error::Silent);
        assert!(ctrl.aborted().unwrap().is_silent());
        assert!(diagnostics.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_warnings_do_not_abort() {
        let (mut ctrl, diagnostics, _rx, _tx) = control_plane();
        ctrl.warn(Error::unspecified("careful"));
        ctrl.emit(Diagnostic::warning("also careful"));
        assert!(ctrl.aborted().is_none());
        let diag = diagnostics.try_recv().unwrap().unwrap();
        assert_eq!(diag.severity(), Severity::Warning);
    }

    #[test]
    fn test_error_diagnostic_aborts() {
        let (mut ctrl, _diagnostics, _rx, _tx) = control_plane();
        ctrl.emit(Diagnostic::error("bad input"));
        assert!(matches!(ctrl.aborted(), Some(Error::Diagnostic(_))));
    }

    #[test]
    fn test_wakeup_sends_control_message() {
        let (ctrl, _diagnostics, mut rx, tx) = control_plane();
        let wakeup = ctrl.wakeup();
        assert!(wakeup.wake());
        assert!(matches!(rx.try_recv(), Ok(Control::Wake)));
        drop(tx);
        assert!(!wakeup.wake());
    }

    #[test]
    fn test_node_without_service() {
        let (mut ctrl, _diagnostics, _rx, _tx) = control_plane();
        assert!(ctrl.node().is_none());
        ctrl.set_waiting(true);
        assert!(ctrl.is_waiting());
    }
}
