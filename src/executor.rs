//! Plan execution.
//!
//! Dialects with transactional DDL apply the whole plan in one transaction.
//! Dialects without it (MySQL commits every DDL statement implicitly) apply
//! operation by operation with a checkpoint, so a mid-plan failure surfaces
//! as a resumable [`Error::PartialApply`] instead of continuing silently.
//! Either way the executor re-diffs live against target afterwards and
//! treats residual divergence as a generator defect.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::database::{DatabaseConnection, DatabaseError};
use crate::ddl::capabilities;
use crate::diff;
use crate::error::{Error, Result};
use crate::plan::MigrationPlan;
use crate::schema::SchemaSnapshot;
use crate::snapshot::build_live_snapshot;

/// How an apply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// All operations executed and the post-apply re-diff came back clean.
    Applied,
    /// The plan was empty; nothing to do.
    NoChanges,
}

/// Outcome of a successful apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub version: String,
    pub applied_operations: usize,
    pub status: ExecutionStatus,
}

/// Applies migration plans against one connection.
pub struct MigrationExecutor {
    conn: Arc<dyn DatabaseConnection>,
}

impl MigrationExecutor {
    pub fn new(conn: Arc<dyn DatabaseConnection>) -> Self {
        Self { conn }
    }

    /// Execute a plan and verify convergence against `target`.
    ///
    /// `exclude_tables` is passed through to the verification snapshot so
    /// infrastructure tables don't count as drift.
    pub async fn apply(
        &self,
        plan: &MigrationPlan,
        target: &SchemaSnapshot,
        exclude_tables: &[String],
    ) -> Result<ExecutionResult> {
        if plan.is_empty() {
            return Ok(ExecutionResult {
                version: plan.version.clone(),
                applied_operations: 0,
                status: ExecutionStatus::NoChanges,
            });
        }

        let caps = capabilities(self.conn.get_database_type());
        if caps.transactional_ddl {
            self.apply_transactional(plan).await?;
        } else {
            self.apply_checkpointed(plan).await?;
        }

        self.verify(target, exclude_tables).await?;

        info!(
            version = plan.short_version(),
            operations = plan.operations.len(),
            "plan applied and verified"
        );
        Ok(ExecutionResult {
            version: plan.version.clone(),
            applied_operations: plan.operations.len(),
            status: ExecutionStatus::Applied,
        })
    }

    /// All-or-nothing path for dialects with transactional DDL.
    async fn apply_transactional(&self, plan: &MigrationPlan) -> Result<()> {
        let mut tx = self.conn.begin_transaction().await?;
        for planned in &plan.operations {
            let total = planned.forward_sql.len();
            for (step, statement) in planned.forward_sql.iter().enumerate() {
                if let Err(e) = tx.execute(statement, &[]).await {
                    error!(
                        operation = %planned.operation.describe(),
                        statement,
                        error = %e,
                        "statement failed; rolling back plan"
                    );
                    tx.rollback().await?;
                    return Err(Error::Database(DatabaseError::Query(format!(
                        "{} (statement: '{}'): {}",
                        planned.operation.describe(),
                        statement,
                        e
                    ))));
                }
                // Multi-statement operations are table rebuilds; the step
                // events double as stall-detection heartbeats
                if total > 1 {
                    info!(
                        table = planned.operation.table_name(),
                        step = step + 1,
                        total,
                        "rebuild step applied"
                    );
                } else {
                    debug!(statement, "statement applied");
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// One-at-a-time path with a checkpoint after each operation.
    async fn apply_checkpointed(&self, plan: &MigrationPlan) -> Result<()> {
        for (index, planned) in plan.operations.iter().enumerate() {
            let total = planned.forward_sql.len();
            for (step, statement) in planned.forward_sql.iter().enumerate() {
                if let Err(e) = self.conn.execute(statement, &[]).await {
                    error!(
                        operation = %planned.operation.describe(),
                        checkpoint = index,
                        statement,
                        error = %e,
                        "statement failed; halting at checkpoint"
                    );
                    return Err(Error::PartialApply {
                        version: plan.version.clone(),
                        applied: index,
                        total: plan.operations.len(),
                        statement: statement.clone(),
                        cause: e.to_string(),
                    });
                }
                if total > 1 {
                    info!(
                        table = planned.operation.table_name(),
                        step = step + 1,
                        total,
                        "rebuild step applied"
                    );
                }
            }
            debug!(
                checkpoint = index + 1,
                operation = %planned.operation.describe(),
                "operation applied"
            );
        }
        Ok(())
    }

    /// Defensive re-diff against generator defects.
    async fn verify(&self, target: &SchemaSnapshot, exclude_tables: &[String]) -> Result<()> {
        let live = build_live_snapshot(self.conn.as_ref(), exclude_tables).await?;
        let residual = diff::diff(&live, target);
        if residual.is_empty() {
            return Ok(());
        }
        error!(
            residual = residual.len(),
            first = %residual[0].describe(),
            "post-apply verification found remaining drift"
        );
        Err(Error::Verification {
            residual: residual.len(),
            table: residual[0].table_name().to_string(),
        })
    }
}
