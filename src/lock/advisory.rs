use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::debug;

use crate::database::{DatabaseConnection, DatabaseTransaction};
use crate::error::Result;
use crate::lock::{LockHandle, LockProvider, LockState, TryAcquire, lock_key_i64};

/// Postgres session advisory lock.
///
/// Uses `pg_try_advisory_xact_lock` inside a transaction held open for the
/// duration: the transaction pins one pooled connection (advisory locks are
/// session-scoped), and the server releases the lock automatically when the
/// transaction ends, including when the holding process dies, which is the
/// crash-recovery story for this provider.
pub struct AdvisoryLockProvider {
    conn: Arc<dyn DatabaseConnection>,
    key: i64,
    state: Mutex<LockState>,
    guard_tx: tokio::sync::Mutex<Option<Box<dyn DatabaseTransaction>>>,
}

impl AdvisoryLockProvider {
    pub fn new(conn: Arc<dyn DatabaseConnection>, identity: &str) -> Self {
        Self {
            conn,
            key: lock_key_i64(identity),
            state: Mutex::new(LockState::Unlocked),
            guard_tx: tokio::sync::Mutex::new(None),
        }
    }

    fn set_state(&self, state: LockState) {
        *self.state.lock().expect("lock state poisoned") = state;
    }
}

#[async_trait]
impl LockProvider for AdvisoryLockProvider {
    async fn try_acquire(&self) -> Result<TryAcquire> {
        self.set_state(LockState::Acquiring);

        let mut tx = self.conn.begin_transaction().await?;
        let sql = format!(
            "SELECT pg_try_advisory_xact_lock({}) AS acquired",
            self.key
        );
        let rows = tx.query(&sql, &[]).await?;
        let acquired = rows
            .first()
            .map(|row| row.get_bool("acquired"))
            .transpose()?
            .unwrap_or(false);

        if acquired {
            debug!(key = self.key, "advisory lock acquired");
            *self.guard_tx.lock().await = Some(tx);
            self.set_state(LockState::Held);
            Ok(TryAcquire::Acquired(LockHandle::new(self.key.to_string())))
        } else {
            // Dropping the transaction releases nothing we hold
            tx.rollback().await?;
            self.set_state(LockState::Unlocked);
            Ok(TryAcquire::Busy { holder: None })
        }
    }

    async fn release(&self, _handle: LockHandle) -> Result<()> {
        self.set_state(LockState::Releasing);
        if let Some(tx) = self.guard_tx.lock().await.take() {
            // Committing ends the transaction and frees the xact-scoped lock
            tx.commit().await?;
        }
        self.set_state(LockState::Unlocked);
        debug!(key = self.key, "advisory lock released");
        Ok(())
    }

    fn is_held(&self) -> bool {
        *self.state.lock().expect("lock state poisoned") == LockState::Held
    }
}
