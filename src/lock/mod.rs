//! Mutual exclusion for schema mutation across processes.
//!
//! One capability-selected [`LockProvider`] per dialect: a session advisory
//! lock on Postgres, a named server-side lock on MySQL, and a heartbeat
//! lock file where no server primitive exists (SQLite). Exactly one
//! outstanding [`LockHandle`] per target database at any time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::config::{EngineConfig, LockWait};
use crate::database::DatabaseConnection;
use crate::ddl::{LockStrategy, capabilities};
use crate::error::{Error, Result};

mod advisory;
mod file;
mod named;

pub use advisory::AdvisoryLockProvider;
pub use file::FileLockProvider;
pub use named::NamedLockProvider;

/// Lifecycle of a provider's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    Releasing,
    /// Heartbeat went stale and a later run reclaimed the lock.
    Expired,
}

/// Opaque token for exclusive schema-mutation rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    token: Uuid,
    key: String,
}

impl LockHandle {
    pub(crate) fn new(key: String) -> Self {
        Self {
            token: Uuid::new_v4(),
            key,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> Uuid {
        self.token
    }
}

/// Outcome of a single non-blocking acquisition attempt.
pub enum TryAcquire {
    Acquired(LockHandle),
    /// Someone else is migrating; `holder` names them when known.
    Busy { holder: Option<String> },
}

/// Provider interface for one mutual-exclusion mechanism.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// One non-blocking acquisition attempt.
    async fn try_acquire(&self) -> Result<TryAcquire>;

    /// Release a previously acquired handle. Safe to call once per handle.
    async fn release(&self, handle: LockHandle) -> Result<()>;

    /// Whether this provider currently holds the lock.
    fn is_held(&self) -> bool;

    /// Acquire with the configured wait behavior: fail fast by default,
    /// bounded polling with backoff when opted in.
    async fn acquire(&self, wait: &LockWait) -> Result<LockHandle> {
        let deadline = wait.deadline().map(|d| Instant::now() + d);
        let mut backoff = Duration::from_millis(250);

        loop {
            match self.try_acquire().await? {
                TryAcquire::Acquired(handle) => return Ok(handle),
                TryAcquire::Busy { holder } => {
                    let retry = match deadline {
                        Some(deadline) if Instant::now() < deadline => true,
                        _ => false,
                    };
                    if !retry {
                        return Err(Error::LockTimeout { holder });
                    }
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(2));
                }
            }
        }
    }
}

/// Derive a signed 64-bit advisory lock key from the connection identity.
pub fn lock_key_i64(identity: &str) -> i64 {
    let digest = Sha256::digest(identity.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Derive a short hex lock name from the connection identity, for named
/// server locks and lock file names.
pub fn lock_key_hex(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Select the lock provider for a connection based on its dialect's
/// capability row.
pub fn provider_for(
    conn: Arc<dyn DatabaseConnection>,
    config: &EngineConfig,
) -> Box<dyn LockProvider> {
    let identity = conn.connection_identity();
    match capabilities(conn.get_database_type()).lock_strategy {
        LockStrategy::Advisory => Box::new(AdvisoryLockProvider::new(conn, &identity)),
        LockStrategy::NamedLock => Box::new(NamedLockProvider::new(conn, &identity)),
        LockStrategy::File => Box::new(FileLockProvider::new(
            file::lock_file_path(&identity, config.lock_dir.as_deref()),
            config.heartbeat_interval(),
            config.lock_staleness_threshold(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_per_identity() {
        let a = lock_key_i64("postgres://db:5432/app");
        let b = lock_key_i64("postgres://db:5432/app");
        let c = lock_key_i64("postgres://db:5432/other");
        assert_eq!(a, b);
        assert_ne!(a, c);

        assert_eq!(
            lock_key_hex("postgres://db:5432/app"),
            lock_key_hex("postgres://db:5432/app")
        );
        assert_eq!(lock_key_hex("x").len(), 16);
    }
}
