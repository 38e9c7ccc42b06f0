use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::debug;

use crate::database::{DatabaseConnection, DatabaseTransaction};
use crate::error::Result;
use crate::lock::{LockHandle, LockProvider, LockState, TryAcquire, lock_key_hex};

/// MySQL named server-side lock (`GET_LOCK` / `RELEASE_LOCK`).
///
/// `GET_LOCK` is session-scoped, so the provider holds a transaction open
/// purely to pin one pooled connection; `RELEASE_LOCK` must run on that same
/// session. The server frees the lock if the session dies.
pub struct NamedLockProvider {
    lock_name: String,
    state: Mutex<LockState>,
    guard_tx: tokio::sync::Mutex<Option<Box<dyn DatabaseTransaction>>>,
    conn: Arc<dyn DatabaseConnection>,
}

impl NamedLockProvider {
    pub fn new(conn: Arc<dyn DatabaseConnection>, identity: &str) -> Self {
        Self {
            lock_name: format!("schemasync_{}", lock_key_hex(identity)),
            state: Mutex::new(LockState::Unlocked),
            guard_tx: tokio::sync::Mutex::new(None),
            conn,
        }
    }

    fn set_state(&self, state: LockState) {
        *self.state.lock().expect("lock state poisoned") = state;
    }
}

#[async_trait]
impl LockProvider for NamedLockProvider {
    async fn try_acquire(&self) -> Result<TryAcquire> {
        self.set_state(LockState::Acquiring);

        let mut tx = self.conn.begin_transaction().await?;
        // Timeout 0: non-blocking; bounded waiting is the coordinator's job
        let sql = format!("SELECT GET_LOCK('{}', 0) AS acquired", self.lock_name);
        let rows = tx.query(&sql, &[]).await?;
        let acquired = rows
            .first()
            .and_then(|row| row.try_get_i64("acquired").ok().flatten())
            .unwrap_or(0)
            == 1;

        if acquired {
            debug!(lock = %self.lock_name, "named lock acquired");
            *self.guard_tx.lock().await = Some(tx);
            self.set_state(LockState::Held);
            Ok(TryAcquire::Acquired(LockHandle::new(self.lock_name.clone())))
        } else {
            tx.rollback().await?;
            self.set_state(LockState::Unlocked);
            Ok(TryAcquire::Busy { holder: None })
        }
    }

    async fn release(&self, _handle: LockHandle) -> Result<()> {
        self.set_state(LockState::Releasing);
        if let Some(mut tx) = self.guard_tx.lock().await.take() {
            let sql = format!("SELECT RELEASE_LOCK('{}')", self.lock_name);
            tx.query(&sql, &[]).await?;
            tx.commit().await?;
        }
        self.set_state(LockState::Unlocked);
        debug!(lock = %self.lock_name, "named lock released");
        Ok(())
    }

    fn is_held(&self) -> bool {
        *self.state.lock().expect("lock state poisoned") == LockState::Held
    }
}
