use crate::database::DatabaseError;
use std::io;
use thiserror::Error;

/// Unified error type for the engine.
///
/// Fatal variants carry the offending table/column and the attempted
/// operation so callers can surface an actionable message instead of a raw
/// driver fault.
#[derive(Debug, Error)]
pub enum Error {
    /// The target database could not be reached at all. Fatal.
    #[error("database unreachable ({identity}): {detail}. Check connectivity and credentials before retrying")]
    Connectivity { identity: String, detail: String },

    /// The dialect returned catalog metadata we could not interpret. Fatal.
    #[error("malformed catalog metadata for table '{table}': {detail}")]
    Introspection { table: String, detail: String },

    /// Another process holds the schema lock. Recoverable: skip and continue
    /// startup, the lock holder converges the schema.
    #[error("schema lock is held by another process{}", holder.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
    LockTimeout { holder: Option<String> },

    /// A destructive operation was present and not confirmed. Recoverable.
    #[error("plan {version} contains {count} destructive operation(s) (first: {first}); re-run with force_destructive / --force-destructive to apply")]
    RiskRefused {
        version: String,
        count: usize,
        first: String,
    },

    /// Live schema still diverges from the target after a full apply. Fatal:
    /// this signals a DDL generator defect, not an operator mistake.
    #[error("schema still diverges after apply: {residual} residual change(s), first affects table '{table}'. Re-run `plan` to inspect; report this as a generator bug")]
    Verification { residual: usize, table: String },

    /// A non-transactional dialect failed mid-plan. Fatal but resumable from
    /// the recorded checkpoint.
    #[error("plan {version} failed after {applied}/{total} operation(s) at '{statement}': {cause}. The remaining operations can be re-planned and resumed")]
    PartialApply {
        version: String,
        applied: usize,
        total: usize,
        statement: String,
        cause: String,
    },

    /// Invalid declared model (duplicate column, nullable primary key, ...).
    #[error("model definition error: {0}")]
    ModelDefinition(String),

    /// DDL could not be generated for the target dialect.
    #[error("SQL generation error: {0}")]
    SqlGeneration(String),

    /// The target dialect has no way to express the requested change.
    #[error("unsupported for this dialect: {0}")]
    UnsupportedFeature(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// A before/after hook explicitly signaled abort.
    #[error("operation aborted by hook '{hook}': {reason}")]
    HookAbort { hook: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors an instance may swallow during startup (another
    /// process is migrating; we continue and rely on it to converge).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::RiskRefused { .. })
    }
}

/// Helper to create a SqlGeneration error
pub fn sql_generation_error<S: Into<String>>(msg: S) -> Error {
    Error::SqlGeneration(msg.into())
}

/// Helper to create an UnsupportedFeature error
pub fn unsupported_feature_error<S: Into<String>>(msg: S) -> Error {
    Error::UnsupportedFeature(msg.into())
}

/// Helper to create a ModelDefinition error
pub fn model_definition_error<S: Into<String>>(msg: S) -> Error {
    Error::ModelDefinition(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_refused_mentions_override() {
        let err = Error::RiskRefused {
            version: "ab12cd34".to_string(),
            count: 1,
            first: "DropColumn items.legacy_flag".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("destructive"));
        assert!(msg.contains("force-destructive"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn verification_names_table() {
        let err = Error::Verification {
            residual: 2,
            table: "orders".to_string(),
        };
        assert!(err.to_string().contains("orders"));
        assert!(!err.is_recoverable());
    }
}
