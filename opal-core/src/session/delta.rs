//! Copy-on-write wrapper sessions (spec.md §4.5): `with_env`/`with_workdir` return one of these
//! rather than mutating the base session, so chained modifications compose without ever touching
//! the receiver — this is what isolates nested `@parallel`/`@ssh` branches from each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Error;

use super::{resolve_workdir, RunOptions, RunResult, Session};

/// Wraps a base [`Session`] with an environment delta and/or a working-directory override,
/// applied at `run`/`put`/`get` time. Re-wrapping (calling `with_env` on a `DeltaSession` again)
/// re-merges deltas so chained `WithEnv` calls compose, matching spec.md §4.5's "Wrapper
/// sessions" contract.
pub struct DeltaSession {
    base: Arc<dyn Session>,
    env_delta: HashMap<String, String>,
    workdir: Option<PathBuf>,
}

impl DeltaSession {
    /// Wraps `base` with no delta yet applied.
    pub fn new(base: Arc<dyn Session>) -> Self {
        Self {
            base,
            env_delta: HashMap::new(),
            workdir: None,
        }
    }

    /// Builder-style: sets the environment delta.
    #[must_use]
    pub fn with_env_delta(mut self, delta: HashMap<String, String>) -> Self {
        self.env_delta = delta;
        self
    }

    /// Builder-style: sets the working-directory override (already resolved/cleaned by the
    /// caller).
    #[must_use]
    pub fn with_workdir_override(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    fn merged_env(&self) -> HashMap<String, String> {
        let mut env = self.base.env();
        env.extend(self.env_delta.clone());
        env
    }

    fn effective_cwd(&self) -> PathBuf {
        self.workdir.clone().unwrap_or_else(|| self.base.cwd())
    }
}

#[async_trait]
impl Session for DeltaSession {
    async fn run(&self, ctx: &Context, argv: &[String], mut opts: RunOptions) -> Result<RunResult, Error> {
        // Reconstructing the concrete session type underneath an arbitrary chain of deltas isn't
        // possible through the trait object alone (and would lose a live SSH channel if it were),
        // so the delta is threaded down via `RunOptions`'s env/cwd overrides instead; every
        // concrete `Session::run` honors them in preference to its own stored env/cwd.
        opts.env_override = Some(
            opts.env_override
                .take()
                .map_or_else(|| self.merged_env(), |inner| {
                    let mut env = self.merged_env();
                    env.extend(inner);
                    env
                }),
        );
        opts.cwd_override = Some(opts.cwd_override.take().unwrap_or_else(|| self.effective_cwd()));
        self.base.run(ctx, argv, opts).await
    }

    async fn put(&self, ctx: &Context, data: &[u8], path: &Path, mode: u32) -> Result<(), Error> {
        let resolved = resolve_workdir(&self.effective_cwd(), path);
        self.base.put(ctx, data, &resolved, mode).await
    }

    async fn get(&self, ctx: &Context, path: &Path) -> Result<Vec<u8>, Error> {
        let resolved = resolve_workdir(&self.effective_cwd(), path);
        self.base.get(ctx, &resolved).await
    }

    fn env(&self) -> HashMap<String, String> {
        self.merged_env()
    }

    fn cwd(&self) -> PathBuf {
        self.effective_cwd()
    }

    fn with_env(self: Arc<Self>, delta: HashMap<String, String>) -> Arc<dyn Session> {
        let mut merged = self.env_delta.clone();
        merged.extend(delta);
        Arc::new(Self {
            base: Arc::clone(&self.base),
            env_delta: merged,
            workdir: self.workdir.clone(),
        })
    }

    fn with_workdir(self: Arc<Self>, dir: &Path) -> Arc<dyn Session> {
        let new_cwd = resolve_workdir(&self.effective_cwd(), dir);
        Arc::new(Self {
            base: Arc::clone(&self.base),
            env_delta: self.env_delta.clone(),
            workdir: Some(new_cwd),
        })
    }

    async fn close(&self) -> Result<(), Error> {
        self.base.close().await
    }

    fn transport_path(&self) -> String {
        self.base.transport_path()
    }
}
