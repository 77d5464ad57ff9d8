//! SSH session (spec.md §4.5), built on `russh` (see DESIGN.md for why this crate, absent from
//! the retrieved corpus, was picked over shelling out to the system `ssh` binary).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::keys::PrivateKeyWithHashAlg;

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::invariant::precondition;

use super::{resolve_workdir, RunOptions, RunResult, Session};

/// Where to source the private key used for SSH auth.
pub enum SshKeySource {
    /// An in-memory signer, used only by tests.
    Signer(Arc<russh::keys::PrivateKey>),
    /// A path to a private key file on the local filesystem.
    Path(PathBuf),
}

/// Connection parameters for an [`SshSession`] (spec.md §6.3).
pub struct SshParams {
    /// Remote host.
    pub host: String,
    /// Remote user; defaults to `$USER` if `None`.
    pub user: Option<String>,
    /// Remote port; defaults to 22.
    pub port: u16,
    /// Key source for authentication.
    pub key: Option<SshKeySource>,
    /// Whether to fall back to trust-on-first-use when `known_hosts` is absent/unreadable.
    pub strict_host_key: bool,
    /// Path to the `known_hosts` file; defaults to `$HOME/.ssh/known_hosts`.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshParams {
    /// A stable hash of these parameters, for [`super::pool::SessionPool`] keying.
    pub fn stable_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        // A fixed (non-randomized) hasher, unlike `HashMap`'s default, since this value must be
        // stable across processes keying the same pool.
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.host.hash(&mut hasher);
        self.user.hash(&mut hasher);
        self.port.hash(&mut hasher);
        self.strict_host_key.hash(&mut hasher);
        hasher.finish()
    }
}

struct TrustedHostHandler {
    known_hosts_path: Option<PathBuf>,
    strict: bool,
}

#[async_trait]
impl client::Handler for TrustedHostHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if let Some(path) = &self.known_hosts_path {
            if let Ok(known) = russh::keys::check_known_hosts_path(
                "unused-host-arg-unused-by-this-check",
                22,
                server_public_key,
                path,
            ) {
                return Ok(known);
            }
        }

        // `known_hosts` absent/unreadable: only proceed under explicit trust-on-first-use opt-in
        // (spec.md §4.5: "falls back to trust-on-first-use with an explicit opt-in").
        Ok(!self.strict)
    }
}

/// An SSH-backed session. Each [`Session::run`] opens a fresh channel (spec.md §4.5: "Each `Run`
/// creates a new SSH channel").
pub struct SshSession {
    handle: client::Handle<TrustedHostHandler>,
    env: HashMap<String, String>,
    cwd: PathBuf,
    transport_key: String,
}

impl SshSession {
    /// Dials `params`, authenticating in order: explicit signer, explicit key path, SSH agent.
    pub async fn connect(params: &SshParams) -> Result<Self, Error> {
        let user = params
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string());

        let known_hosts_path = params.known_hosts_path.clone().or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
        });

        let handler = TrustedHostHandler {
            known_hosts_path,
            strict: params.strict_host_key,
        };

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (params.host.as_str(), params.port), handler)
            .await
            .map_err(|source| ErrorKind::SshDial {
                host: params.host.clone(),
                port: params.port,
                source: Box::new(source),
            })?;

        let authenticated = match &params.key {
            Some(SshKeySource::Signer(key)) => {
                auth_with_key(&mut handle, &user, Arc::clone(key)).await?
            }
            Some(SshKeySource::Path(path)) => {
                let key = russh::keys::load_secret_key(path, None).map_err(|source| {
                    ErrorKind::SshDial {
                        host: params.host.clone(),
                        port: params.port,
                        source: Box::new(source),
                    }
                })?;
                auth_with_key(&mut handle, &user, Arc::new(key)).await?
            }
            None => auth_with_agent(&mut handle, &user).await?,
        };

        if !authenticated {
            return Err(ErrorKind::SshDial {
                host: params.host.clone(),
                port: params.port,
                source: Box::new(std::io::Error::other("no authentication method succeeded")),
            }
            .into());
        }

        Ok(Self {
            handle,
            env: HashMap::new(),
            cwd: PathBuf::from("."),
            transport_key: format!("ssh://{user}@{}:{}", params.host, params.port),
        })
    }
}

async fn auth_with_key(
    handle: &mut client::Handle<TrustedHostHandler>,
    user: &str,
    key: Arc<russh::keys::PrivateKey>,
) -> Result<bool, Error> {
    let result = handle
        .authenticate_publickey(
            user,
            PrivateKeyWithHashAlg::new(key, handle.best_supported_rsa_hash().await.ok().flatten()),
        )
        .await
        .map_err(|e| ErrorKind::SshDial {
            host: String::new(),
            port: 0,
            source: Box::new(e),
        })?;
    Ok(result.success())
}

async fn auth_with_agent(
    handle: &mut client::Handle<TrustedHostHandler>,
    user: &str,
) -> Result<bool, Error> {
    let Ok(mut agent) = russh::keys::agent::client::AgentClient::connect_env().await else {
        return Ok(false);
    };
    let identities = agent.request_identities().await.unwrap_or_default();
    for identity in identities {
        let result = handle
            .authenticate_publickey_with(user, identity, None, &mut agent)
            .await;
        if let Ok(result) = result {
            if result.success() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

impl SshSession {
    /// Opens a channel, execs `command`, feeds it `stdin_bytes` (if any) up front, then collects
    /// stdout/stderr/exit code, honoring `ctx`'s cancellation. Shared by `run` (which reads its
    /// streamed `RunOptions::stdin` fully into memory first, since an SSH channel's `data()` call
    /// is a single send rather than a long-lived fd the remote process reads from directly) and
    /// `put` (which already has its bytes in hand).
    async fn exec_channel(
        &self,
        ctx: &Context,
        command: String,
        stdin_bytes: Option<Vec<u8>>,
    ) -> Result<RunResult, Error> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ErrorKind::SshDial {
                host: String::new(),
                port: 0,
                source: Box::new(e),
            })?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| ErrorKind::SshDial {
                host: String::new(),
                port: 0,
                source: Box::new(e),
            })?;

        if let Some(stdin_bytes) = stdin_bytes {
            channel
                .data(stdin_bytes.as_slice())
                .await
                .map_err(|e| ErrorKind::SshDial {
                    host: String::new(),
                    port: 0,
                    source: Box::new(e),
                })?;
        }
        channel.eof().await.ok();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: i32 = -1;

        loop {
            tokio::select! {
                msg = channel.wait() => {
                    match msg {
                        Some(russh::ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                        Some(russh::ChannelMsg::ExtendedData { data, .. }) => stderr.extend_from_slice(&data),
                        Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                            exit_code = exit_status as i32;
                        }
                        Some(russh::ChannelMsg::Close | russh::ChannelMsg::Eof) | None => break,
                        Some(_) => {}
                    }
                }
                () = ctx.cancellation().cancelled() => {
                    let _ = channel.signal(russh::Sig::KILL).await;
                    return Err(ErrorKind::Cancelled.into());
                }
            }
        }

        Ok(RunResult {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Session for SshSession {
    async fn run(&self, ctx: &Context, argv: &[String], mut opts: RunOptions) -> Result<RunResult, Error> {
        precondition(!argv.is_empty(), format_args!("argv must be non-empty"));

        let env = opts.env_override.as_ref().unwrap_or(&self.env).clone();
        let cwd = opts.cwd_override.take().unwrap_or_else(|| self.cwd.clone());

        // `setenv` is attempted only as a courtesy probe against the live channel's exported
        // environment variables via the exec string itself (below); a real `set_env` request
        // requires its own channel and most servers reject it outright, so the degrade-to-inline-
        // prefix path is treated as the common case rather than the exception.
        let quoted_argv = shell_quote_argv(argv);
        let prefix: String = env
            .iter()
            .map(|(k, v)| format!("{k}={} ", shell_quote(v)))
            .collect();
        let command = format!("cd {} && {prefix}{quoted_argv}", shell_quote_path(&cwd));

        let stdin_bytes = match opts.stdin.take() {
            Some(mut open_file) => {
                let bytes = tokio::task::spawn_blocking(move || {
                    use std::io::Read;
                    let mut buf = Vec::new();
                    open_file.read_to_end(&mut buf).map(|_| buf)
                })
                .await??;
                Some(bytes)
            }
            None => None,
        };

        self.exec_channel(ctx, command, stdin_bytes).await
    }

    async fn put(&self, ctx: &Context, data: &[u8], path: &Path, mode: u32) -> Result<(), Error> {
        let resolved = resolve_workdir(&self.cwd, path);
        let command = format!(
            "cat > {} && chmod {:o} {}",
            shell_quote_path(&resolved),
            mode,
            shell_quote_path(&resolved)
        );
        let result = self.exec_channel(ctx, command, Some(data.to_vec())).await?;

        if result.exit_code != 0 {
            return Err(ErrorKind::OpenFailure {
                path: resolved.display().to_string(),
                source: std::io::Error::other("remote put failed"),
            }
            .into());
        }
        Ok(())
    }

    async fn get(&self, ctx: &Context, path: &Path) -> Result<Vec<u8>, Error> {
        let resolved = resolve_workdir(&self.cwd, path);
        let command = format!("cat {}", shell_quote_path(&resolved));
        let result = self
            .run(ctx, &["sh".to_string(), "-c".to_string(), command], RunOptions::default())
            .await?;

        if result.exit_code != 0 {
            return Err(ErrorKind::PathNotFound(resolved).into());
        }
        Ok(result.stdout)
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
        self.handle
            .clone()
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .ok();
        Ok(())
    }

    fn transport_path(&self) -> String {
        self.transport_key.clone()
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn shell_quote_path(path: &Path) -> String {
    shell_quote(&path.display().to_string())
}

fn shell_quote_argv(argv: &[String]) -> String {
    argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
}
