//! Durable migration history.
//!
//! One append-only table per target database: version (primary key),
//! description, applied_at, rollback_sql, risk_level, status. Recording
//! an already-recorded version is a no-op success (detection legitimately
//! re-runs an already-applied plan hash), and a record-write failure after a
//! successful apply degrades only audit capability, so callers log it
//! instead of failing the migration.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::database::{DatabaseConnection, DatabaseType, DatabaseValue};
use crate::error::Result;
use crate::risk::RiskLevel;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Terminal status of a recorded migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Applied,
    RolledBack,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Applied => "applied",
            MigrationStatus::RolledBack => "rolledback",
            MigrationStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(MigrationStatus::Applied),
            "rolledback" => Some(MigrationStatus::RolledBack),
            "failed" => Some(MigrationStatus::Failed),
            _ => None,
        }
    }
}

/// One persisted migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub rollback_sql: String,
    pub risk_level: RiskLevel,
    pub status: MigrationStatus,
}

/// History store scoped to one database-connection identity.
pub struct HistoryStore {
    conn: Arc<dyn DatabaseConnection>,
    table: String,
    table_ready: AtomicBool,
}

impl HistoryStore {
    pub fn new(conn: Arc<dyn DatabaseConnection>, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
            table_ready: AtomicBool::new(false),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the history table on first use.
    async fn ensure_table(&self) -> Result<()> {
        if self.table_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let timestamp_type = match self.conn.get_database_type() {
            DatabaseType::Postgres => "TIMESTAMPTZ",
            DatabaseType::MySql => "DATETIME",
            DatabaseType::Sqlite => "TEXT",
        };
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n  \
               version VARCHAR(64) PRIMARY KEY,\n  \
               description TEXT NOT NULL,\n  \
               applied_at {timestamp_type} NOT NULL,\n  \
               rollback_sql TEXT NOT NULL,\n  \
               risk_level VARCHAR(16) NOT NULL,\n  \
               status VARCHAR(16) NOT NULL\n)",
            table = self.table,
            timestamp_type = timestamp_type,
        );
        self.conn.execute(&sql, &[]).await?;
        self.table_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Append a record. Re-recording a version is a no-op success.
    pub async fn record(&self, record: &MigrationRecord) -> Result<()> {
        self.ensure_table().await?;
        if self.contains(&record.version).await? {
            return Ok(());
        }

        let applied_at = record.applied_at.format(TIMESTAMP_FORMAT).to_string();
        let sql = match self.conn.get_database_type() {
            DatabaseType::Postgres => format!(
                "INSERT INTO {} (version, description, applied_at, rollback_sql, risk_level, status) \
                 VALUES ($1, $2, $3::timestamptz, $4, $5, $6)",
                self.table
            ),
            _ => format!(
                "INSERT INTO {} (version, description, applied_at, rollback_sql, risk_level, status) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                self.table
            ),
        };
        self.conn
            .execute(
                &sql,
                &[
                    DatabaseValue::Text(record.version.clone()),
                    DatabaseValue::Text(record.description.clone()),
                    DatabaseValue::Text(applied_at),
                    DatabaseValue::Text(record.rollback_sql.clone()),
                    DatabaseValue::Text(record.risk_level.to_string()),
                    DatabaseValue::Text(record.status.as_str().to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Newest-first listing.
    pub async fn list(&self, limit: usize) -> Result<Vec<MigrationRecord>> {
        self.ensure_table().await?;
        let applied_at_expr = match self.conn.get_database_type() {
            DatabaseType::Postgres => "to_char(applied_at, 'YYYY-MM-DD HH24:MI:SS')",
            DatabaseType::MySql => "DATE_FORMAT(applied_at, '%Y-%m-%d %H:%i:%s')",
            DatabaseType::Sqlite => "applied_at",
        };
        let sql = format!(
            "SELECT version, description, {} AS applied_at, rollback_sql, risk_level, status \
             FROM {} ORDER BY applied_at DESC, version LIMIT {}",
            applied_at_expr, self.table, limit
        );
        let rows = self.conn.query(&sql, &[]).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw_applied = row.get_string("applied_at")?;
            let raw_risk = row.get_string("risk_level")?;
            let raw_status = row.get_string("status")?;
            records.push(MigrationRecord {
                version: row.get_string("version")?,
                description: row.get_string("description")?,
                applied_at: parse_timestamp(&raw_applied),
                rollback_sql: row.get_string("rollback_sql")?,
                risk_level: RiskLevel::parse(&raw_risk).unwrap_or_else(|| {
                    warn!(value = %raw_risk, "unknown risk level in history; treating as destructive");
                    RiskLevel::Destructive
                }),
                status: MigrationStatus::parse(&raw_status).unwrap_or(MigrationStatus::Failed),
            });
        }
        Ok(records)
    }

    /// Whether a plan version was already fully applied.
    pub async fn has_applied(&self, version: &str) -> Result<bool> {
        self.ensure_table().await?;
        let sql = match self.conn.get_database_type() {
            DatabaseType::Postgres => format!(
                "SELECT 1 AS present FROM {} WHERE version = $1 AND status = 'applied'",
                self.table
            ),
            _ => format!(
                "SELECT 1 AS present FROM {} WHERE version = ? AND status = 'applied'",
                self.table
            ),
        };
        let row = self
            .conn
            .query_one(&sql, &[DatabaseValue::Text(version.to_string())])
            .await?;
        Ok(row.is_some())
    }

    async fn contains(&self, version: &str) -> Result<bool> {
        let sql = match self.conn.get_database_type() {
            DatabaseType::Postgres => {
                format!("SELECT 1 AS present FROM {} WHERE version = $1", self.table)
            }
            _ => format!("SELECT 1 AS present FROM {} WHERE version = ?", self.table),
        };
        let row = self
            .conn
            .query_one(&sql, &[DatabaseValue::Text(version.to_string())])
            .await?;
        Ok(row.is_some())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(|_| {
            warn!(value = %raw, "unparseable applied_at in history");
            Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
        })
}
