use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::diff::ChangeOperation;
use crate::risk::RiskLevel;

/// One change operation with its classification and generated SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub operation: ChangeOperation,
    pub risk: RiskLevel,
    pub forward_sql: Vec<String>,
    /// Best-effort inverse; empty when the dialect cannot express one.
    pub rollback_sql: Vec<String>,
}

/// An ordered migration plan. The content hash over operations and SQL is
/// the plan's version: equal drift always hashes to the same version, which
/// is what makes history idempotence checks possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub version: String,
    pub operations: Vec<PlannedOperation>,
    /// Max over operation risks; monotonic in the number of operations.
    pub risk: RiskLevel,
    pub dry_run: bool,
}

impl MigrationPlan {
    pub fn new(operations: Vec<PlannedOperation>, dry_run: bool) -> Self {
        let risk = operations
            .iter()
            .map(|op| op.risk)
            .max()
            .unwrap_or(RiskLevel::Safe);
        let version = content_hash(&operations);
        Self {
            version,
            operations,
            risk,
            dry_run,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn short_version(&self) -> &str {
        &self.version[..12.min(self.version.len())]
    }

    pub fn destructive_operations(&self) -> Vec<&PlannedOperation> {
        self.operations
            .iter()
            .filter(|op| op.risk == RiskLevel::Destructive)
            .collect()
    }

    /// All forward statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.operations
            .iter()
            .flat_map(|op| op.forward_sql.iter())
            .map(|s| s.as_str())
    }

    /// All rollback statements, in reverse operation order.
    pub fn rollback_statements(&self) -> Vec<String> {
        self.operations
            .iter()
            .rev()
            .flat_map(|op| op.rollback_sql.iter().cloned())
            .collect()
    }

    /// The full SQL script, for dry-run display and the history record.
    pub fn sql_script(&self) -> String {
        let mut script = String::new();
        for statement in self.statements() {
            script.push_str(statement);
            script.push_str(";\n");
        }
        script
    }

    /// One-line summary used as the history record description.
    pub fn describe(&self) -> String {
        let ops: Vec<String> = self
            .operations
            .iter()
            .map(|op| op.operation.describe())
            .collect();
        format!("{} operation(s): {}", ops.len(), ops.join(", "))
    }
}

fn content_hash(operations: &[PlannedOperation]) -> String {
    let mut hasher = Sha256::new();
    for op in operations {
        hasher.update(op.operation.describe().as_bytes());
        hasher.update([0u8]);
        for sql in &op.forward_sql {
            hasher.update(sql.as_bytes());
            hasher.update([0u8]);
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType};

    fn add_stock() -> PlannedOperation {
        PlannedOperation {
            operation: ChangeOperation::AddColumn {
                table: "items".to_string(),
                column: ColumnDef {
                    name: "stock".to_string(),
                    column_type: ColumnType::Integer,
                    nullable: false,
                    default_value: Some("0".to_string()),
                    ..Default::default()
                },
            },
            risk: RiskLevel::Safe,
            forward_sql: vec!["ALTER TABLE \"items\" ADD COLUMN \"stock\" INTEGER NOT NULL DEFAULT 0".to_string()],
            rollback_sql: vec!["ALTER TABLE \"items\" DROP COLUMN \"stock\"".to_string()],
        }
    }

    fn drop_table() -> PlannedOperation {
        PlannedOperation {
            operation: ChangeOperation::DropTable {
                table: crate::schema::TableDef {
                    name: "gone".to_string(),
                    ..Default::default()
                },
            },
            risk: RiskLevel::Destructive,
            forward_sql: vec!["DROP TABLE IF EXISTS \"gone\"".to_string()],
            rollback_sql: vec![],
        }
    }

    #[test]
    fn version_is_deterministic() {
        let a = MigrationPlan::new(vec![add_stock()], false);
        let b = MigrationPlan::new(vec![add_stock()], true);
        // dry_run does not change identity
        assert_eq!(a.version, b.version);

        let c = MigrationPlan::new(vec![add_stock(), drop_table()], false);
        assert_ne!(a.version, c.version);
    }

    #[test]
    fn risk_is_max_over_operations() {
        let plan = MigrationPlan::new(vec![add_stock(), drop_table()], false);
        assert_eq!(plan.risk, RiskLevel::Destructive);
        assert_eq!(plan.destructive_operations().len(), 1);
    }

    #[test]
    fn empty_plan_is_safe_and_empty() {
        let plan = MigrationPlan::new(vec![], false);
        assert!(plan.is_empty());
        assert_eq!(plan.risk, RiskLevel::Safe);
        assert_eq!(plan.sql_script(), "");
    }

    #[test]
    fn rollback_runs_in_reverse_order() {
        let plan = MigrationPlan::new(vec![add_stock(), drop_table()], false);
        let rollback = plan.rollback_statements();
        // drop_table has no rollback; add_stock's drop comes last-first
        assert_eq!(rollback, vec!["ALTER TABLE \"items\" DROP COLUMN \"stock\"".to_string()]);
    }
}
