//! Session pool (spec.md §4.5, §5.3): reuses a live [`Session`] keyed by transport identity so
//! repeated `@ssh.connect("host")` decorators against the same host share one connection instead
//! of dialing fresh each time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Error;
use crate::session::ssh::{SshParams, SshSession};
use crate::session::Session;

/// A pooled key: transport kind plus a stable hash of its connection parameters, so two
/// `@ssh.connect` calls with identical host/user/port/key reuse one [`SshSession`].
#[derive(Hash, Eq, PartialEq, Clone)]
struct PoolKey {
    host: String,
    port: u16,
    params_hash: u64,
}

/// Keyed cache of live sessions. `get_or_create` coalesces concurrent callers for the same key
/// onto a single dial, rather than letting each spawn its own connection and discarding all but
/// the winner (spec.md §5.3: "Concurrent requests for the same key must not each dial
/// independently").
#[derive(Default)]
pub struct SessionPool {
    entries: Mutex<HashMap<PoolKey, Arc<dyn Session>>>,
}

impl SessionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pooled session for `params`, dialing a fresh one under the pool's lock if
    /// absent. The lock is held across the dial, so a second caller for the same key blocks on
    /// the first caller's connect rather than racing it — acceptable here since dials are rare
    /// relative to `run` calls and the pool is not on the hot path of command execution.
    pub async fn get_or_create(&self, params: &SshParams) -> Result<Arc<dyn Session>, Error> {
        let key = PoolKey {
            host: params.host.clone(),
            port: params.port,
            params_hash: params.stable_hash(),
        };

        let mut entries = self.entries.lock().await;
        if let Some(session) = entries.get(&key) {
            return Ok(Arc::clone(session));
        }

        let session: Arc<dyn Session> = Arc::new(SshSession::connect(params).await?);
        entries.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Closes and drops every pooled session. Errors from individual `close` calls are ignored
    /// (spec.md §4.5: "best-effort teardown"); the pool is empty afterward regardless.
    pub async fn close_all(&self) {
        let mut entries = self.entries.lock().await;
        for session in entries.values() {
            let _ = session.close().await;
        }
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_all_empties_the_pool() {
        let pool = SessionPool::new();
        pool.close_all().await;
        assert!(pool.entries.lock().await.is_empty());
    }
}
