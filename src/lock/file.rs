use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::lock::{LockHandle, LockProvider, LockState, TryAcquire, lock_key_hex};

/// Contents of the lock file: who holds the lock and how fresh they are.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFileContents {
    pid: u32,
    holder: String,
    acquired_at: i64,
    heartbeat_at: i64,
}

/// Filesystem lock for dialects without a server-side lock primitive.
///
/// The file carries the holder's pid and a heartbeat timestamp that a
/// background task refreshes while the lock is held. A heartbeat older than
/// the staleness threshold means the holder died mid-apply; the lock is then
/// forcibly reclaimed with a warning. An fs2 exclusive lock guards each
/// read-modify-write of the file, so two processes racing for a stale lock
/// cannot both win.
pub struct FileLockProvider {
    path: PathBuf,
    heartbeat_interval: Duration,
    staleness: Duration,
    state: Arc<Mutex<LockState>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

/// Where the lock file for a connection identity lives: the configured lock
/// dir if set, next to the database file for file-backed SQLite, the system
/// temp dir otherwise.
pub fn lock_file_path(identity: &str, lock_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = lock_dir {
        return dir.join(format!("schemasync-{}.lock", lock_key_hex(identity)));
    }
    if let Some(db_path) = identity.strip_prefix("sqlite:") {
        if db_path != ":memory:" && !db_path.is_empty() {
            return PathBuf::from(format!("{}.schemasync.lock", db_path));
        }
    }
    std::env::temp_dir().join(format!("schemasync-{}.lock", lock_key_hex(identity)))
}

impl FileLockProvider {
    pub fn new(path: PathBuf, heartbeat_interval: Duration, staleness: Duration) -> Self {
        Self {
            path,
            heartbeat_interval,
            staleness,
            state: Arc::new(Mutex::new(LockState::Unlocked)),
            heartbeat_task: Mutex::new(None),
        }
    }

    fn set_state(&self, state: LockState) {
        *self.state.lock().expect("lock state poisoned") = state;
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Refresh the heartbeat timestamp, but only while the file is still
    /// ours (a reclaimer may have replaced it).
    fn refresh_heartbeat(path: &Path, own_pid: u32) {
        let Ok(mut file) = OpenOptions::new().read(true).write(true).open(path) else {
            return;
        };
        if file.lock_exclusive().is_err() {
            return;
        }
        let mut raw = String::new();
        if file.read_to_string(&mut raw).is_ok() {
            if let Ok(mut contents) = serde_json::from_str::<LockFileContents>(&raw) {
                if contents.pid == own_pid {
                    contents.heartbeat_at = Self::now();
                    let _ = file.seek(SeekFrom::Start(0));
                    let _ = file.set_len(0);
                    let _ = file.write_all(&serde_json::to_vec(&contents).unwrap_or_default());
                }
            }
        }
        let _ = FileExt::unlock(&file);
    }
}

#[async_trait]
impl LockProvider for FileLockProvider {
    async fn try_acquire(&self) -> Result<TryAcquire> {
        self.set_state(LockState::Acquiring);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut raw = String::new();
        file.read_to_string(&mut raw)?;

        if !raw.trim().is_empty() {
            match serde_json::from_str::<LockFileContents>(&raw) {
                Ok(contents) => {
                    let age = Self::now().saturating_sub(contents.heartbeat_at);
                    if age < self.staleness.as_secs() as i64 {
                        let _ = FileExt::unlock(&file);
                        self.set_state(LockState::Unlocked);
                        return Ok(TryAcquire::Busy {
                            holder: Some(format!("pid {}", contents.pid)),
                        });
                    }
                    warn!(
                        path = %self.path.display(),
                        dead_pid = contents.pid,
                        heartbeat_age_secs = age,
                        "stale schema lock reclaimed; previous holder appears dead"
                    );
                    self.set_state(LockState::Expired);
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "unreadable schema lock file; reclaiming"
                    );
                }
            }
        }

        let pid = std::process::id();
        let now = Self::now();
        let contents = LockFileContents {
            pid,
            holder: format!("schemasync@{}", pid),
            acquired_at: now,
            heartbeat_at: now,
        };
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(&serde_json::to_vec(&contents)?)?;
        let _ = FileExt::unlock(&file);

        // Keep the heartbeat fresh for as long as we hold the lock
        let path = self.path.clone();
        let interval = self.heartbeat_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                FileLockProvider::refresh_heartbeat(&path, pid);
            }
        });
        if let Some(previous) = self.heartbeat_task.lock().expect("task slot poisoned").replace(task)
        {
            previous.abort();
        }

        self.set_state(LockState::Held);
        debug!(path = %self.path.display(), "file lock acquired");
        Ok(TryAcquire::Acquired(LockHandle::new(
            self.path.display().to_string(),
        )))
    }

    async fn release(&self, _handle: LockHandle) -> Result<()> {
        self.set_state(LockState::Releasing);
        if let Some(task) = self.heartbeat_task.lock().expect("task slot poisoned").take() {
            task.abort();
        }
        // Only remove the file if it is still ours
        if let Ok(raw) = fs::read_to_string(&self.path) {
            if let Ok(contents) = serde_json::from_str::<LockFileContents>(&raw) {
                if contents.pid == std::process::id() {
                    fs::remove_file(&self.path)?;
                }
            }
        }
        self.set_state(LockState::Unlocked);
        debug!(path = %self.path.display(), "file lock released");
        Ok(())
    }

    fn is_held(&self) -> bool {
        *self.state.lock().expect("lock state poisoned") == LockState::Held
    }
}
