//! Orchestration engine: composes snapshotting, diffing, risk
//! classification, DDL generation, locking, execution and history into the
//! `plan` / `apply` / `status` operations.
//!
//! One engine instance is scoped to one database-connection identity, so a
//! single process can drive several independent databases side by side.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::database::DatabaseConnection;
use crate::ddl::{DdlGenerator, capabilities};
use crate::diff;
use crate::error::{Error, Result};
use crate::executor::{ExecutionResult, ExecutionStatus, MigrationExecutor};
use crate::history::{HistoryStore, MigrationRecord, MigrationStatus};
use crate::hooks::{DestructiveApproval, HookEvent, HookRegistry};
use crate::lock::{LockProvider, provider_for};
use crate::plan::{MigrationPlan, PlannedOperation};
use crate::risk::{self, RiskLevel};
use crate::schema::{ModelRegistry, SchemaSnapshot};
use crate::snapshot::{SnapshotCache, build_live_snapshot, build_target_snapshot};

/// One unresolved drift item, as reported by `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub description: String,
    pub table: String,
    pub risk: RiskLevel,
}

/// Engine status for collaborators (the CRUD route generator consults this
/// and refuses traffic against tables with unresolved destructive drift).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub pending_changes: Vec<PendingChange>,
    pub last_applied: Option<MigrationRecord>,
}

impl EngineStatus {
    pub fn has_pending(&self) -> bool {
        !self.pending_changes.is_empty()
    }

    /// Tables that must not serve traffic until their destructive drift is
    /// resolved.
    pub fn blocking_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .pending_changes
            .iter()
            .filter(|change| change.risk == RiskLevel::Destructive)
            .map(|change| change.table.clone())
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }
}

/// The schema synchronization engine.
pub struct SyncEngine {
    conn: Arc<dyn DatabaseConnection>,
    registry: ModelRegistry,
    config: EngineConfig,
    hooks: HookRegistry,
    history: HistoryStore,
    lock: Box<dyn LockProvider>,
    cache: SnapshotCache,
    approval: Option<Box<dyn DestructiveApproval>>,
}

impl SyncEngine {
    pub fn new(
        conn: Arc<dyn DatabaseConnection>,
        registry: ModelRegistry,
        config: EngineConfig,
    ) -> Self {
        let history = HistoryStore::new(Arc::clone(&conn), config.history_table.clone());
        let lock = provider_for(Arc::clone(&conn), &config);
        Self {
            conn,
            registry,
            config,
            hooks: HookRegistry::new(),
            history,
            lock,
            cache: SnapshotCache::new(),
            approval: None,
        }
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn set_destructive_approval(&mut self, approval: Box<dyn DestructiveApproval>) {
        self.approval = Some(approval);
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn lock(&self) -> &dyn LockProvider {
        self.lock.as_ref()
    }

    fn cache_key(&self) -> String {
        SnapshotCache::cache_key(
            self.conn.get_database_type(),
            &self.conn.connection_identity(),
        )
    }

    fn excluded_tables(&self) -> Vec<String> {
        vec![self.config.history_table.clone()]
    }

    async fn live_snapshot(&self) -> Result<Arc<SchemaSnapshot>> {
        let key = self.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let snapshot = Arc::new(
            build_live_snapshot(self.conn.as_ref(), &self.excluded_tables()).await?,
        );
        self.cache.store(key, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn target_snapshot(&self) -> Result<SchemaSnapshot> {
        build_target_snapshot(&self.registry, self.conn.get_database_type())
    }

    /// Detect drift and produce an executable plan.
    ///
    /// Snapshot comparison is read-only; no lock is taken here.
    pub async fn plan(&self, dry_run: bool) -> Result<MigrationPlan> {
        self.hooks.fire(HookEvent::BeforePlan, None).await?;

        let live = self.live_snapshot().await?;
        let target = self.target_snapshot()?;
        let operations = diff::diff(&live, &target);

        let db_type = self.conn.get_database_type();
        let caps = capabilities(db_type);
        let generator = DdlGenerator::new(db_type, self.config.allow_truncating_copy);

        let mut planned = Vec::with_capacity(operations.len());
        for operation in operations {
            let live_table = live.table(operation.table_name());
            let forward_sql = generator.generate(&operation, live_table)?;
            let rollback_sql = match generator.generate_rollback(&operation, live_table) {
                Ok(statements) => statements,
                Err(e) => {
                    warn!(
                        operation = %operation.describe(),
                        error = %e,
                        "no rollback available for operation"
                    );
                    Vec::new()
                }
            };
            let risk = risk::classify(&operation, caps);
            planned.push(PlannedOperation {
                operation,
                risk,
                forward_sql,
                rollback_sql,
            });
        }

        let plan = MigrationPlan::new(planned, dry_run);
        info!(
            version = plan.short_version(),
            operations = plan.operations.len(),
            risk = %plan.risk,
            dry_run,
            "plan built"
        );

        if let Err(e) = self.hooks.fire(HookEvent::AfterPlan, Some(&plan)).await {
            // The plan already exists; an after-hook cannot un-make it
            warn!(error = %e, "after-plan hook signaled abort; ignoring");
        }
        Ok(plan)
    }

    /// Apply a plan under the schema lock.
    ///
    /// Destructive plans are refused unless `force_destructive` is set, the
    /// config allows them, or a registered confirmation hook approves.
    pub async fn apply(
        &self,
        plan: &MigrationPlan,
        force_destructive: bool,
    ) -> Result<ExecutionResult> {
        if plan.dry_run {
            return Err(Error::Config(
                "dry-run plans are display-only; re-plan without dry_run to apply".to_string(),
            ));
        }
        if plan.is_empty() {
            return Ok(ExecutionResult {
                version: plan.version.clone(),
                applied_operations: 0,
                status: ExecutionStatus::NoChanges,
            });
        }

        if plan.risk == RiskLevel::Destructive
            && !force_destructive
            && !self.config.allow_destructive
        {
            let approved = match &self.approval {
                Some(approval) => approval.approve(plan).await,
                None => false,
            };
            if !approved {
                let destructive = plan.destructive_operations();
                return Err(Error::RiskRefused {
                    version: plan.short_version().to_string(),
                    count: destructive.len(),
                    first: destructive
                        .first()
                        .map(|op| op.operation.describe())
                        .unwrap_or_default(),
                });
            }
        }

        self.hooks.fire(HookEvent::BeforeApply, Some(plan)).await?;

        let handle = self.lock.acquire(&self.config.lock_wait).await?;
        let target = self.target_snapshot()?;
        let executor = MigrationExecutor::new(Arc::clone(&self.conn));
        let result = executor
            .apply(plan, &target, &self.excluded_tables())
            .await;
        if let Err(e) = self.lock.release(handle).await {
            warn!(error = %e, "failed to release schema lock");
        }

        match result {
            Ok(result) => {
                self.cache.invalidate(&self.cache_key());
                self.record_outcome(plan, MigrationStatus::Applied, plan.describe())
                    .await;
                if let Err(e) = self.hooks.fire(HookEvent::AfterApply, Some(plan)).await {
                    warn!(error = %e, "after-apply hook signaled abort; ignoring");
                }
                Ok(result)
            }
            Err(e) => {
                self.cache.invalidate(&self.cache_key());
                if let Error::PartialApply { applied, total, .. } = &e {
                    // Explicitly mark the partial apply so a later run can
                    // see how far this one got
                    self.record_outcome(
                        plan,
                        MigrationStatus::Failed,
                        format!("partial apply: {}/{} operations: {}", applied, total, plan.describe()),
                    )
                    .await;
                }
                Err(e)
            }
        }
    }

    /// Pending drift and the most recent history record.
    pub async fn status(&self) -> Result<EngineStatus> {
        let live = self.live_snapshot().await?;
        let target = self.target_snapshot()?;
        let caps = capabilities(self.conn.get_database_type());

        let pending_changes = diff::diff(&live, &target)
            .into_iter()
            .map(|operation| PendingChange {
                description: operation.describe(),
                table: operation.table_name().to_string(),
                risk: risk::classify(&operation, caps),
            })
            .collect();

        let last_applied = self.history.list(1).await?.into_iter().next();
        Ok(EngineStatus {
            pending_changes,
            last_applied,
        })
    }

    /// The startup path: plan and apply in one step.
    ///
    /// Destructive drift and a lock held elsewhere surface as recoverable
    /// errors (`Error::is_recoverable`); instances skip those and continue
    /// starting up, relying on the winner (or the operator) to converge
    /// the schema.
    pub async fn sync(&self) -> Result<ExecutionResult> {
        let plan = self.plan(false).await?;
        self.apply(&plan, false).await
    }

    /// History-store failures degrade to warnings; the schema change itself
    /// succeeded.
    async fn record_outcome(&self, plan: &MigrationPlan, status: MigrationStatus, description: String) {
        let record = MigrationRecord {
            version: plan.version.clone(),
            description,
            applied_at: Utc::now(),
            rollback_sql: plan.rollback_statements().join(";\n"),
            risk_level: plan.risk,
            status,
        };
        if let Err(e) = self.history.record(&record).await {
            warn!(
                version = plan.short_version(),
                error = %e,
                "failed to write migration history record; audit trail degraded"
            );
        }
    }
}
