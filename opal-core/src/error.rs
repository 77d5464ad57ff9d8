//! Error facilities.

use std::path::PathBuf;

/// Unified error type for this crate. Wraps an [`ErrorKind`]; kept as a newtype so we can grow
/// context (source location, step id) onto it later without breaking callers matching on
/// `#[source]`.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns the kind of error this is.
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns true if this error represents a cancellation (context deadline/cancel), as opposed
    /// to a user or transient I/O error.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }
}

/// Taxonomy of errors produced by the evaluator, session layer, and decorator protocol.
///
/// Programmer errors (unknown decorator, malformed schema, broken invariant) are raised through
/// [`crate::invariant`] instead of this enum; by the time code constructs an [`ErrorKind`] the
/// condition is expected to be a legitimate user or transient failure.
#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    /// A command node named a decorator path with no registered implementation.
    #[error("unknown decorator: {0}")]
    UnknownDecorator(String),

    /// A decorator argument failed schema validation.
    #[error("invalid argument for {decorator} decorator: {message}")]
    InvalidArgument {
        /// Path of the decorator whose schema rejected the argument.
        decorator: String,
        /// Human-readable explanation of the failure.
        message: String,
    },

    /// A `@var.<name>` reference had no corresponding entry in the plan's variable vault.
    #[error("variable \"{0}\" not found")]
    VariableNotFound(String),

    /// A `@env.<name>` reference had no value in the session environment and no default.
    #[error("environment variable \"{0}\" not set")]
    EnvVarNotFound(String),

    /// A redirect named a sink mode the target does not support.
    #[error("sink {sink} does not support {mode} redirection")]
    UnsupportedSinkMode {
        /// Description of the sink (e.g. its path).
        sink: String,
        /// The redirect mode that was rejected.
        mode: &'static str,
    },

    /// Opening a sink or other file-like resource failed.
    #[error("failed to open {path}: {source}")]
    OpenFailure {
        /// Path that could not be opened.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A decorator resolved to a role the active session's transport scope forbids.
    #[error("decorator {decorator} requires transport scope {required:?} but session is {actual:?}")]
    TransportScopeMismatch {
        /// Path of the decorator being invoked.
        decorator: String,
        /// Transport scope the decorator's descriptor requires.
        required: crate::descriptor::TransportScope,
        /// Transport scope of the active session.
        actual: crate::descriptor::TransportScope,
    },

    /// Dialing an SSH endpoint failed.
    #[error("ssh dial to {host}:{port} failed: {source}")]
    SshDial {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An SSH host key did not match any entry in the known_hosts file, and
    /// trust-on-first-use was not explicitly requested.
    #[error("host key for {0} is not trusted; no entry in known_hosts")]
    UntrustedHostKey(String),

    /// A command run over a session exited with a signal rather than a code, and the
    /// session could not map it to an exit code.
    #[error("process for \"{0}\" terminated abnormally")]
    AbnormalTermination(String),

    /// The evaluator encountered a file descriptor or path it could not resolve.
    #[error("no such file or directory: {}", .0.display())]
    PathNotFound(PathBuf),

    /// Reading or writing through a session's transport failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The plan reader rejected a malformed or oversized binary plan.
    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    /// A background task (pipeline stage, spawned job) could not be joined.
    #[error("task join failure: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The active Go-style context was cancelled or its deadline elapsed.
    #[error("context cancelled")]
    Cancelled,

    /// Functionality this core intentionally does not implement (see the specification's
    /// Non-goals); distinguished from a programmer-error invariant violation.
    #[error("not supported: {0}")]
    Unsupported(&'static str),

    /// An `OpenFile` slot was read from when it is write-only (stdout/stderr/a pipe writer).
    #[error("{0} is not readable")]
    OpenFileNotReadable(&'static str),

    /// An `OpenFile` slot was written to when it is read-only (stdin/a pipe reader).
    #[error("{0} is not writable")]
    OpenFileNotWritable(&'static str),
}

impl<T> From<T> for Error
where
    ErrorKind: From<T>,
{
    fn from(value: T) -> Self {
        Self {
            kind: ErrorKind::from(value),
        }
    }
}

/// Convenience constructor for an [`ErrorKind::Unsupported`] wrapped as a `Result`.
pub fn unsupported<T>(msg: &'static str) -> Result<T, Error> {
    Err(ErrorKind::Unsupported(msg).into())
}
