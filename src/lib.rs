// schemasync - keeps a live relational schema in step with the declared
// data models consumed by a generated CRUD layer: drift detection,
// risk-gated DDL generation, cross-process locking and a durable
// migration history.

pub mod config;
pub mod database;
pub mod ddl;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod hooks;
pub mod lock;
mod logging;
pub mod plan;
pub mod risk;
pub mod schema;
pub mod snapshot;

pub use logging::init_logging;

// Re-export configuration types
pub use config::{EngineConfig, LockWait};

// Re-export database access types
pub use database::{
    DatabaseConfig, DatabaseConnection, DatabaseError, DatabaseResult, DatabaseRow,
    DatabaseTransaction, DatabaseType, DatabaseValue, PoolConfig, create_database_connection,
};

// Re-export schema model types
pub use schema::{ColumnDef, ColumnType, IndexDef, ModelRegistry, SchemaSnapshot, TableDef};

// Re-export the drift pipeline
pub use diff::ChangeOperation;
pub use plan::{MigrationPlan, PlannedOperation};
pub use risk::RiskLevel;

// Re-export engine surface
pub use engine::{EngineStatus, PendingChange, SyncEngine};
pub use error::{Error, Result};
pub use executor::{ExecutionResult, ExecutionStatus};
pub use history::{HistoryStore, MigrationRecord, MigrationStatus};
pub use hooks::{DestructiveApproval, Hook, HookContext, HookEvent, HookOutcome, HookRegistry};
pub use lock::{LockHandle, LockProvider, LockState};

/// Version and build metadata, stamped at compile time.
pub mod build_info {
    /// Crate version
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
    /// Short git hash of the build
    pub const GIT_HASH: &str = env!("SCHEMASYNC_GIT_HASH");
    /// Build timestamp (UTC, RFC3339)
    pub const BUILD_TIME: &str = env!("SCHEMASYNC_BUILD_TIME_UTC");
}
