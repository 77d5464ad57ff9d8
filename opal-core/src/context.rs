//! Execution context (C6): the immutable bundle passed into every command execution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::openfiles::OpenFiles;
use crate::plan::{Value, VariableVault};
use crate::session::Session;
use crate::telemetry::TraceHandle;

/// A cooperative cancellation signal, standing in for the Go `context.Context` spec.md threads
/// through the evaluator. `tokio-util`'s `CancellationToken` would be the obvious off-the-shelf
/// choice, but it is not part of the teacher's (or the wider pack's) dependency set, so this is a
/// small hand-rolled equivalent built directly on `tokio::sync::Notify`, which the teacher's own
/// `brush-core` already depends on transitively through `tokio`'s `sync` feature.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

struct CancellationInner {
    cancelled: std::sync::atomic::AtomicBool,
    notify: tokio::sync::Notify,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                cancelled: std::sync::atomic::AtomicBool::new(false),
                notify: tokio::sync::Notify::new(),
            }),
        }
    }
}

impl CancellationToken {
    /// Creates a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this token (or a token it was derived from, via [`Self::child`]) has
    /// fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Fires cancellation, waking every task awaiting [`Self::cancelled`].
    pub fn cancel(&self) {
        self.inner
            .cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once [`Self::cancel`] has been called (or resolves immediately if it already
    /// has).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Re-check after registering the waiter to close the race between the `is_cancelled`
        // check above and `cancel()` firing just before `notified()` is polled.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Derives a child token that is cancelled whenever `self` is, in addition to its own
    /// `@timeout`-driven deadline; used by `@timeout` to build a context with a deadline without
    /// exposing a separate deadline field to decorators (spec.md §4.7.4).
    pub fn child_with_deadline(&self, duration: std::time::Duration) -> Self {
        let child = Self::new();
        let parent = self.clone();
        let child_for_timer = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.cancelled() => child_for_timer.cancel(),
                () = tokio::time::sleep(duration) => child_for_timer.cancel(),
            }
        });
        child
    }
}

/// Passed into every command execution (spec.md §4.6). All fields are private; every mutator
/// returns a new value, leaving the receiver untouched.
#[derive(Clone)]
pub struct Context {
    cancellation: CancellationToken,
    session: Arc<dyn Session>,
    args: HashMap<String, Value>,
    open_files: OpenFiles,
    trace: TraceHandle,
    vault: Arc<VariableVault>,
}

impl Context {
    /// Builds a root context bound to `session`, with the default (stdin/stdout/stderr) open
    /// files, an empty variable vault, and a fresh cancellation token.
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            session,
            args: HashMap::new(),
            open_files: OpenFiles::default(),
            trace: TraceHandle::root(),
            vault: Arc::new(VariableVault::default()),
        }
    }

    /// The cancellation token in effect for this context.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The session this context's commands run against.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// The per-call argument map for the command currently being executed.
    pub fn args(&self) -> &HashMap<String, Value> {
        &self.args
    }

    /// The open files (stdin/stdout/stderr and any redirected/piped slots) visible to the
    /// command currently being executed.
    pub fn open_files(&self) -> &OpenFiles {
        &self.open_files
    }

    /// The telemetry trace handle for the current span.
    pub fn trace(&self) -> &TraceHandle {
        &self.trace
    }

    /// The variable vault `@var.<name>` resolves against (spec.md §4.8).
    pub fn vault(&self) -> &VariableVault {
        &self.vault
    }

    /// Returns a new context bound to `vault` instead of the current one (set once by the
    /// executor façade from the plan's placeholder table before evaluation begins).
    #[must_use]
    pub fn with_vault(&self, vault: Arc<VariableVault>) -> Self {
        Self {
            vault,
            ..self.clone()
        }
    }

    /// Returns a new context bound to `session` instead of the current one (used when a Boundary
    /// decorator opens a nested session).
    #[must_use]
    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }

    /// Returns a new context with a derived cancellation token carrying `deadline` in addition to
    /// whatever cancellation already applies (used by `@timeout`).
    #[must_use]
    pub fn with_deadline(&self, deadline: std::time::Duration) -> Self {
        Self {
            cancellation: self.cancellation.child_with_deadline(deadline),
            ..self.clone()
        }
    }

    /// Returns a new context scoped to one more level of telemetry tracing.
    #[must_use]
    pub fn with_trace(&self, trace: TraceHandle) -> Self {
        Self {
            trace,
            ..self.clone()
        }
    }

    /// Inherits cancellation/session/trace from `self` but replaces call-local state (args, open
    /// files) — the evaluator calls this once per pipeline stage / sequence sibling so a branch
    /// can never observe another branch's pipes or args (spec.md §4.6).
    #[must_use]
    pub fn clone_for_child(&self, args: HashMap<String, Value>, open_files: OpenFiles) -> Self {
        Self {
            cancellation: self.cancellation.clone(),
            session: Arc::clone(&self.session),
            args,
            open_files,
            trace: self.trace.clone(),
            vault: Arc::clone(&self.vault),
        }
    }

    /// Returns a new context whose argument map is `args`.
    #[must_use]
    pub fn with_args(&self, args: HashMap<String, Value>) -> Self {
        Self {
            args,
            ..self.clone()
        }
    }

    /// Returns a new context whose open files are `open_files`.
    #[must_use]
    pub fn with_open_files(&self, open_files: OpenFiles) -> Self {
        Self {
            open_files,
            ..self.clone()
        }
    }

    /// Returns `Err(Error::from(ErrorKind::Cancelled))` if this context's token has fired.
    pub fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancellation.is_cancelled() {
            return Err(crate::error::ErrorKind::Cancelled.into());
        }
        Ok(())
    }
}
