//! End-to-end engine scenarios against a file-backed SQLite database:
//! drift detection, risk gating, the copy-swap-drop rebuild, history
//! recording and lock contention.

use std::path::Path;
use std::sync::Arc;

use schemasync::lock::provider_for;
use schemasync::{
    ColumnDef, ColumnType, DatabaseConfig, DatabaseConnection, DatabaseType, EngineConfig, Error,
    ExecutionStatus, LockWait, MigrationStatus, ModelRegistry, RiskLevel, SyncEngine, TableDef,
    create_database_connection,
};

async fn connect(dir: &Path) -> Arc<dyn DatabaseConnection> {
    let config = DatabaseConfig {
        db_type: DatabaseType::Sqlite,
        database: dir.join("app.db").display().to_string(),
        ..Default::default()
    };
    Arc::from(create_database_connection(&config).await.unwrap())
}

fn engine_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        lock_dir: Some(dir.join("locks")),
        ..Default::default()
    }
}

fn column(name: &str, column_type: ColumnType, nullable: bool) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        column_type,
        nullable,
        ..Default::default()
    }
}

fn items_table(with_stock: bool, with_legacy: bool) -> TableDef {
    let mut columns = vec![
        ColumnDef {
            name: "id".to_string(),
            column_type: ColumnType::BigInt,
            nullable: false,
            primary_key: true,
            ..Default::default()
        },
        column("name", ColumnType::Varchar(120), false),
    ];
    if with_legacy {
        columns.push(column("legacy_flag", ColumnType::Boolean, true));
    }
    if with_stock {
        columns.push(ColumnDef {
            name: "stock".to_string(),
            column_type: ColumnType::Integer,
            nullable: false,
            default_value: Some("0".to_string()),
            ..Default::default()
        });
    }
    TableDef {
        name: "items".to_string(),
        columns,
        ..Default::default()
    }
}

async fn seed_items(conn: &dyn DatabaseConnection, with_legacy: bool) {
    let legacy = if with_legacy { ", legacy_flag INTEGER" } else { "" };
    conn.execute(
        &format!(
            "CREATE TABLE items (id INTEGER NOT NULL, name TEXT NOT NULL{}, PRIMARY KEY (id))",
            legacy
        ),
        &[],
    )
    .await
    .unwrap();
    for (id, name, flag) in [(1, "anvil", 0), (2, "hammer", 1), (3, "tongs", 0)] {
        let sql = if with_legacy {
            format!(
                "INSERT INTO items (id, name, legacy_flag) VALUES ({}, '{}', {})",
                id, name, flag
            )
        } else {
            format!("INSERT INTO items (id, name) VALUES ({}, '{}')", id, name)
        };
        conn.execute(&sql, &[]).await.unwrap();
    }
}

async fn count_rows(conn: &dyn DatabaseConnection, table: &str) -> i64 {
    conn.query_one(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .await
        .unwrap()
        .unwrap()
        .get_i64("n")
        .unwrap()
}

#[tokio::test]
async fn safe_additive_drift_applies_and_converges() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connect(dir.path()).await;
    seed_items(conn.as_ref(), false).await;

    let registry = ModelRegistry::new(vec![items_table(true, false)]);
    let engine = SyncEngine::new(Arc::clone(&conn), registry, engine_config(dir.path()));

    let plan = engine.plan(false).await.unwrap();
    assert_eq!(plan.operations.len(), 1);
    assert_eq!(plan.operations[0].operation.describe(), "AddColumn items.stock");
    assert_eq!(plan.risk, RiskLevel::Safe);

    let result = engine.apply(&plan, false).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Applied);
    assert_eq!(result.applied_operations, 1);

    // Existing rows got the default
    let row = conn
        .query_one("SELECT stock FROM items WHERE id = 1", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get_i64("stock").unwrap(), 0);

    // History gained exactly one applied record
    let records = engine.history().list(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, MigrationStatus::Applied);
    assert_eq!(records[0].version, plan.version);
    assert!(engine.history().has_applied(&plan.version).await.unwrap());

    // Convergence: a subsequent plan is empty
    let next = engine.plan(false).await.unwrap();
    assert!(next.is_empty());

    let status = engine.status().await.unwrap();
    assert!(!status.has_pending());
    assert!(status.last_applied.is_some());
}

#[tokio::test]
async fn destructive_drift_is_refused_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connect(dir.path()).await;
    seed_items(conn.as_ref(), true).await;

    let registry = ModelRegistry::new(vec![items_table(false, false)]);
    let engine = SyncEngine::new(Arc::clone(&conn), registry, engine_config(dir.path()));

    let plan = engine.plan(false).await.unwrap();
    assert_eq!(plan.operations.len(), 1);
    assert_eq!(
        plan.operations[0].operation.describe(),
        "DropColumn items.legacy_flag"
    );
    assert_eq!(plan.risk, RiskLevel::Destructive);

    let err = engine.apply(&plan, false).await.unwrap_err();
    assert!(matches!(err, Error::RiskRefused { .. }));
    assert!(err.is_recoverable());

    // Nothing was touched
    let row = conn
        .query_one("SELECT legacy_flag FROM items WHERE id = 2", &[])
        .await
        .unwrap();
    assert!(row.is_some());

    // status() marks the table as blocked for the CRUD layer
    let status = engine.status().await.unwrap();
    assert_eq!(status.blocking_tables(), vec!["items".to_string()]);
}

#[tokio::test]
async fn forced_drop_column_rebuilds_and_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connect(dir.path()).await;
    seed_items(conn.as_ref(), true).await;

    let registry = ModelRegistry::new(vec![items_table(false, false)]);
    let engine = SyncEngine::new(Arc::clone(&conn), registry, engine_config(dir.path()));

    let plan = engine.plan(false).await.unwrap();
    // SQLite cannot drop a column in place; the plan must be a rebuild
    assert!(
        plan.operations[0]
            .forward_sql
            .iter()
            .any(|s| s.contains("items__rebuild"))
    );

    let result = engine.apply(&plan, true).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Applied);

    // Row count and surviving column values are intact
    assert_eq!(count_rows(conn.as_ref(), "items").await, 3);
    let row = conn
        .query_one("SELECT name FROM items WHERE id = 2", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get_string("name").unwrap(), "hammer");

    // The dropped column is gone
    assert!(
        conn.query_one("SELECT legacy_flag FROM items LIMIT 1", &[])
            .await
            .is_err()
    );

    // Convergence after the rebuild
    assert!(engine.plan(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn add_table_and_index_from_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connect(dir.path()).await;

    let mut table = items_table(true, false);
    table.indexes.push(schemasync::IndexDef {
        name: None,
        columns: vec!["name".to_string()],
        unique: false,
    });
    let registry = ModelRegistry::new(vec![table]);
    let engine = SyncEngine::new(Arc::clone(&conn), registry, engine_config(dir.path()));

    let plan = engine.plan(false).await.unwrap();
    assert_eq!(plan.operations.len(), 1);
    assert_eq!(plan.risk, RiskLevel::Safe);

    engine.apply(&plan, false).await.unwrap();

    // Table and index exist; plan converges
    conn.execute("INSERT INTO items (id, name, stock) VALUES (1, 'anvil', 5)", &[])
        .await
        .unwrap();
    assert!(engine.plan(false).await.unwrap().is_empty());

    let index = conn
        .query_one(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'items_name_idx'",
            &[],
        )
        .await
        .unwrap();
    assert!(index.is_some());
}

#[tokio::test]
async fn recording_the_same_version_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connect(dir.path()).await;
    seed_items(conn.as_ref(), false).await;

    let registry = ModelRegistry::new(vec![items_table(true, false)]);
    let engine = SyncEngine::new(Arc::clone(&conn), registry, engine_config(dir.path()));

    let plan = engine.plan(false).await.unwrap();
    engine.apply(&plan, false).await.unwrap();

    // Re-recording the applied plan hash must not raise or duplicate
    let record = engine.history().list(1).await.unwrap().remove(0);
    engine.history().record(&record).await.unwrap();
    engine.history().record(&record).await.unwrap();

    let records = engine.history().list(10).await.unwrap();
    assert_eq!(
        records
            .iter()
            .filter(|r| r.version == plan.version)
            .count(),
        1
    );
}

#[tokio::test]
async fn lock_holder_blocks_concurrent_sync() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connect(dir.path()).await;
    seed_items(conn.as_ref(), false).await;

    let config = engine_config(dir.path());
    let registry = ModelRegistry::new(vec![items_table(true, false)]);
    let engine = SyncEngine::new(Arc::clone(&conn), registry, config.clone());

    // Another instance holds the schema lock
    let other = provider_for(Arc::clone(&conn), &config);
    let handle = other.acquire(&LockWait::FailFast).await.unwrap();
    assert!(other.is_held());

    let err = engine.sync().await.unwrap_err();
    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(err.is_recoverable());

    // Winner releases; the blocked instance converges on retry
    other.release(handle).await.unwrap();
    let result = engine.sync().await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Applied);
    assert!(engine.plan(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn dry_run_plans_cannot_be_applied() {
    let dir = tempfile::tempdir().unwrap();
    let conn = connect(dir.path()).await;
    seed_items(conn.as_ref(), false).await;

    let registry = ModelRegistry::new(vec![items_table(true, false)]);
    let engine = SyncEngine::new(Arc::clone(&conn), registry, engine_config(dir.path()));

    let plan = engine.plan(true).await.unwrap();
    assert!(plan.dry_run);
    assert!(!plan.sql_script().is_empty());
    let err = engine.apply(&plan, false).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    // Dry-run planning changed nothing
    assert!(
        conn.query_one("SELECT stock FROM items LIMIT 1", &[])
            .await
            .is_err()
    );
}
