use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How long an instance is willing to wait for the schema lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockWait {
    /// Fail immediately if another process holds the lock (default).
    FailFast,
    /// Poll with backoff until the deadline, then give up.
    BoundedSeconds(u64),
}

impl Default for LockWait {
    fn default() -> Self {
        LockWait::FailFast
    }
}

impl LockWait {
    pub fn deadline(&self) -> Option<Duration> {
        match self {
            LockWait::FailFast => None,
            LockWait::BoundedSeconds(secs) => Some(Duration::from_secs(*secs)),
        }
    }
}

/// Engine configuration for drift detection and apply behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lock acquisition behavior when another instance is migrating.
    #[serde(default)]
    pub lock_wait: LockWait,

    /// Heartbeat refresh interval for the file lock provider and rebuild
    /// progress events.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_seconds: u64,

    /// Name of the migration history table.
    #[serde(default = "default_history_table")]
    pub history_table: String,

    /// Directory for lock files when the dialect has no server-side lock
    /// primitive. Defaults to the directory of the database file (SQLite) or
    /// the system temp dir.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,

    /// Allow destructive operations without a confirmation hook. Equivalent
    /// to passing `force_destructive` on every apply. Off by default.
    #[serde(default)]
    pub allow_destructive: bool,

    /// Opt into lossy type narrowing during copy-swap-drop instead of
    /// requiring the two-phase add/backfill path. Off by default.
    #[serde(default)]
    pub allow_truncating_copy: bool,
}

fn default_heartbeat_secs() -> u64 {
    5
}

fn default_history_table() -> String {
    "schemasync_migrations".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: LockWait::default(),
            heartbeat_interval_seconds: default_heartbeat_secs(),
            history_table: default_history_table(),
            lock_dir: None,
            allow_destructive: false,
            allow_truncating_copy: false,
        }
    }
}

impl EngineConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// A lock heartbeat older than this is considered stale and may be
    /// reclaimed by a later run.
    pub fn lock_staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds * 3)
    }
}
