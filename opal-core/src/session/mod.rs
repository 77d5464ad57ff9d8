//! Session abstraction (C5): a uniform command-exec + filesystem interface over local processes
//! and remote SSH, with copy-on-write environment/working-directory layering.

pub mod delta;
pub mod local;
pub mod pool;
pub mod ssh;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Error;
use crate::openfiles::OpenFile;

/// Options controlling one [`Session::run`] call.
///
/// `env_override`/`cwd_override` are how [`delta::DeltaSession`] applies its accumulated
/// env/workdir delta without needing to reconstruct the concrete session type underneath it (the
/// base session's own `env`/`cwd` are only the *default* used when these are absent) — every
/// concrete `Session::run` implementation must prefer these over its own stored env/cwd when
/// present.
#[derive(Default)]
pub struct RunOptions {
    /// Where to source the child's stdin from; `None` means closed (no input). Wired directly as
    /// the child's file descriptor/SSH channel input rather than copied through userspace, so a
    /// pipeline stage reads its upstream neighbor's output via true OS-level streaming (spec.md
    /// §4.7.2).
    pub stdin: Option<OpenFile>,
    /// Where to route the child's stdout; `None` means "capture it into `RunResult::stdout`".
    pub stdout: Option<OpenFile>,
    /// Where to route the child's stderr; `None` means "capture it into `RunResult::stderr`".
    pub stderr: Option<OpenFile>,
    /// Environment to use instead of the session's own, supplied by a [`delta::DeltaSession`].
    pub env_override: Option<HashMap<String, String>>,
    /// Working directory to use instead of the session's own, supplied by a
    /// [`delta::DeltaSession`].
    pub cwd_override: Option<PathBuf>,
}

/// The result of one [`Session::run`] call.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// The process's exit code, or `-1` if it was cancelled.
    pub exit_code: i32,
    /// Captured stdout, if `RunOptions::stdout` was `None`.
    pub stdout: Vec<u8>,
    /// Captured stderr, if `RunOptions::stderr` was `None`.
    pub stderr: Vec<u8>,
}

/// Uniform operations on an execution target (spec.md §4.5). Implemented by [`local::LocalSession`],
/// [`ssh::SshSession`], and the copy-on-write wrapper [`delta::DeltaSession`].
#[async_trait]
pub trait Session: Send + Sync {
    /// Runs `argv` (which must be non-empty), honoring `ctx`'s cancellation.
    async fn run(&self, ctx: &Context, argv: &[String], opts: RunOptions) -> Result<RunResult, Error>;

    /// Writes `data` to `path` with `mode`, creating parent directories where the implementation
    /// can (local sessions do; SSH writes via the remote shell and relies on the remote `mkdir
    /// -p`-equivalent the caller issued, or fails if the parent is missing).
    async fn put(&self, ctx: &Context, data: &[u8], path: &Path, mode: u32) -> Result<(), Error>;

    /// Reads the full contents of `path`.
    async fn get(&self, ctx: &Context, path: &Path) -> Result<Vec<u8>, Error>;

    /// A defensive copy of this session's current environment.
    fn env(&self) -> HashMap<String, String>;

    /// This session's current working directory.
    fn cwd(&self) -> PathBuf;

    /// Returns a new session whose environment is `self.env()` merged with `delta` (delta wins);
    /// does not mutate `self`.
    fn with_env(self: Arc<Self>, delta: HashMap<String, String>) -> Arc<dyn Session>;

    /// Returns a new session whose working directory is `dir` (resolved against `self.cwd()` if
    /// relative, then cleaned); does not mutate `self`.
    fn with_workdir(self: Arc<Self>, dir: &Path) -> Arc<dyn Session>;

    /// Releases this session's resources. Subsequent operations on it should fail.
    async fn close(&self) -> Result<(), Error>;

    /// A stable key identifying this session's transport, for [`pool::SessionPool`] reuse.
    fn transport_path(&self) -> String;
}

/// Resolves `dir` against `cwd` if relative, then lexically cleans the result (collapsing `.`/`..`
/// components without touching the filesystem) — shared by every `Session::with_workdir`
/// implementation so they agree on "relative `dir` is resolved against current cwd, then
/// cleaned" (spec.md §4.5).
pub(crate) fn resolve_workdir(cwd: &Path, dir: &Path) -> PathBuf {
    let joined = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        cwd.join(dir)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            std::path::Component::ParentDir => {
                cleaned.pop();
            }
            std::path::Component::CurDir => {}
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
