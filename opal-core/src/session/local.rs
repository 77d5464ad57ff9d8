//! Local-process session (spec.md §4.5): spawns a child process per [`Session::run`] using the
//! session's own env/cwd, honoring working directory via the child's `chdir` rather than the
//! host process's `Session::current_dir` is what `LocalSession` sets on `std::process::Command`
//! (mirroring the teacher's `compose_std_command` in `commands.rs`, which builds a fully isolated
//! child environment instead of inheriting the host's).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::invariant::precondition;
use crate::sys;

use super::{resolve_workdir, RunOptions, RunResult, Session};

/// A session that runs commands as child processes of the current host process.
pub struct LocalSession {
    env: HashMap<String, String>,
    cwd: PathBuf,
}

impl LocalSession {
    /// Creates a session seeded with `env`/`cwd`.
    pub fn new(env: HashMap<String, String>, cwd: PathBuf) -> Self {
        Self { env, cwd }
    }

    /// Creates a session seeded from the host process's own environment and current directory —
    /// used only to construct the *root* session; the evaluator never reads the host process's
    /// env/cwd again after this (spec.md §5, "host process env/cwd is never read or written by
    /// the evaluator" beyond this one seeding point).
    pub fn from_host_process() -> std::io::Result<Self> {
        Ok(Self {
            env: std::env::vars().collect(),
            cwd: std::env::current_dir()?,
        })
    }
}

#[async_trait]
impl Session for LocalSession {
    async fn run(
        &self,
        ctx: &Context,
        argv: &[String],
        opts: RunOptions,
    ) -> Result<RunResult, Error> {
        precondition(!argv.is_empty(), format_args!("argv must be non-empty"));

        let env = opts.env_override.as_ref().unwrap_or(&self.env);
        let cwd = opts.cwd_override.as_ref().unwrap_or(&self.cwd);

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .env_clear()
            .envs(env)
            .current_dir(cwd)
            .stdin(opts.stdin.map_or(Stdio::null(), Into::into))
            .stdout(opts.stdout.map_or(Stdio::piped(), Into::into))
            .stderr(opts.stderr.map_or(Stdio::piped(), Into::into));

        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            command.pre_exec(|| {
                // New process group so cancellation can signal the whole tree, not just the
                // immediate child, mirroring the teacher's process-group handling in
                // `ExecutionParameters::process_group_policy`.
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .map_err(std::io::Error::from)
            });
        }

        let mut child = command.spawn().map_err(|source| ErrorKind::OpenFailure {
            path: argv[0].clone(),
            source,
        })?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let pid = child.id();

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                let stdout = read_all(stdout_handle).await?;
                let stderr = read_all(stderr_handle).await?;
                Ok(RunResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                })
            }
            () = ctx.cancellation().cancelled() => {
                if let Some(pid) = pid {
                    let _ = sys::signal::kill_process_group(pid);
                }
                let _ = child.kill().await;
                Err(ErrorKind::Cancelled.into())
            }
        }
    }

    async fn put(&self, _ctx: &Context, data: &[u8], path: &Path, mode: u32) -> Result<(), Error> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
        }

        Ok(())
    }

    async fn get(&self, _ctx: &Context, path: &Path) -> Result<Vec<u8>, Error> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        };
        Ok(tokio::fs::read(&path).await?)
    }

    fn env(&self) -> HashMap<String, String> {
        self.env.clone()
    }

    fn cwd(&self) -> PathBuf {
        self.cwd.clone()
    }

    fn with_env(self: Arc<Self>, delta: HashMap<String, String>) -> Arc<dyn Session> {
        Arc::new(super::delta::DeltaSession::new(self).with_env_delta(delta))
    }

    fn with_workdir(self: Arc<Self>, dir: &Path) -> Arc<dyn Session> {
        let new_cwd = resolve_workdir(&self.cwd, dir);
        Arc::new(super::delta::DeltaSession::new(self).with_workdir_override(new_cwd))
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn transport_path(&self) -> String {
        "local".to_string()
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(handle: Option<R>) -> std::io::Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    if let Some(mut handle) = handle {
        handle.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
