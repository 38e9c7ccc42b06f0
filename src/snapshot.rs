//! Schema snapshot builders.
//!
//! [`build_live_snapshot`] introspects a live database through the generic
//! connection interface, batching catalog queries per database rather than
//! issuing one per column. [`build_target_snapshot`] projects the declared
//! model registry into the same canonical form. Both sides run every column
//! type through [`normalize`], so comparing them never trips over dialect
//! type spellings.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::database::{DatabaseConnection, DatabaseError, DatabaseRow, DatabaseType};
use crate::error::{Error, Result};
use crate::schema::normalize::{parse_type, storage_type};
use crate::schema::{ColumnDef, IndexDef, ModelRegistry, SchemaSnapshot, TableDef};

/// Project the declared models into a snapshot normalized for `dialect`.
pub fn build_target_snapshot(
    registry: &ModelRegistry,
    dialect: DatabaseType,
) -> Result<SchemaSnapshot> {
    registry.validate()?;
    let tables = registry.tables.iter().map(|table| {
        let mut normalized = table.clone();
        for column in &mut normalized.columns {
            column.column_type = storage_type(dialect, &column.column_type);
        }
        normalized
    });
    Ok(SchemaSnapshot::from_tables(tables))
}

/// Introspect the live database into a canonical snapshot.
///
/// `exclude_tables` filters out infrastructure tables (the migration history
/// table, in-flight rebuild shadows) that are not part of the application
/// schema.
pub async fn build_live_snapshot(
    conn: &dyn DatabaseConnection,
    exclude_tables: &[String],
) -> Result<SchemaSnapshot> {
    let snapshot = match conn.get_database_type() {
        DatabaseType::Postgres => postgres_snapshot(conn).await,
        DatabaseType::MySql => mysql_snapshot(conn).await,
        DatabaseType::Sqlite => sqlite_snapshot(conn).await,
    };
    let mut snapshot = snapshot.map_err(|e| connectivity_or(e, conn))?;

    snapshot
        .tables
        .retain(|name, _| !exclude_tables.contains(name) && !name.ends_with("__rebuild"));
    debug!(
        tables = snapshot.tables.len(),
        dialect = %conn.get_database_type(),
        "live snapshot built"
    );
    Ok(snapshot)
}

/// Distinguish "database is down" from "metadata looked wrong".
fn connectivity_or(err: Error, conn: &dyn DatabaseConnection) -> Error {
    match err {
        Error::Database(DatabaseError::Connection(detail)) => Error::Connectivity {
            identity: conn.connection_identity(),
            detail,
        },
        other => other,
    }
}

fn introspection_error(table: &str, detail: impl std::fmt::Display) -> Error {
    Error::Introspection {
        table: table.to_string(),
        detail: detail.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

async fn postgres_snapshot(conn: &dyn DatabaseConnection) -> Result<SchemaSnapshot> {
    let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();

    let table_rows = conn
        .query(
            // information_schema columns are typed as domains; cast to text
            // so the generic row interface can read them
            "SELECT table_name::text AS table_name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[],
        )
        .await?;
    for row in &table_rows {
        let name = row.get_string("table_name")?;
        tables.insert(
            name.clone(),
            TableDef {
                name,
                ..Default::default()
            },
        );
    }

    // One batched query for every column of every table
    let column_rows = conn
        .query(
            "SELECT table_name::text AS table_name, column_name::text AS column_name, \
                    data_type::text AS data_type, udt_name::text AS udt_name, \
                    character_maximum_length::bigint AS character_maximum_length, \
                    numeric_precision::bigint AS numeric_precision, \
                    numeric_scale::bigint AS numeric_scale, \
                    is_nullable::text AS is_nullable, column_default::text AS column_default \
             FROM information_schema.columns \
             WHERE table_schema = 'public' \
             ORDER BY table_name, ordinal_position",
            &[],
        )
        .await?;
    for row in &column_rows {
        let table_name = row.get_string("table_name")?;
        let column_name = row.get_string("column_name")?;
        let data_type = row.get_string("data_type")?;
        let udt_name = row.try_get_string("udt_name")?.unwrap_or_default();

        let raw = match data_type.as_str() {
            // Enum and other user-defined types: unwrap to the underlying
            // catalog name
            "USER-DEFINED" | "ARRAY" => udt_name,
            "character varying" | "character" => match row.try_get_i64("character_maximum_length")?
            {
                Some(len) => format!("{}({})", data_type, len),
                None => data_type,
            },
            "numeric" => {
                match (
                    row.try_get_i64("numeric_precision")?,
                    row.try_get_i64("numeric_scale")?,
                ) {
                    (Some(p), Some(s)) => format!("numeric({},{})", p, s),
                    _ => data_type,
                }
            }
            _ => data_type,
        };

        let nullable = row.get_string("is_nullable")? == "YES";
        let default_value = row.try_get_string("column_default")?;

        let table = tables
            .get_mut(&table_name)
            .ok_or_else(|| introspection_error(&table_name, "column without table"))?;
        table.columns.push(ColumnDef {
            name: column_name,
            column_type: parse_type(DatabaseType::Postgres, &raw),
            nullable,
            default_value,
            unique: false,
            primary_key: false,
        });
    }

    // Indexes and primary keys in one pass; constraint-backed unique indexes
    // fold into column flags instead of surfacing as standalone indexes
    let index_rows = conn
        .query(
            "SELECT t.relname::text AS table_name, i.relname::text AS index_name, \
                    ix.indisunique AS is_unique, ix.indisprimary AS is_primary, \
                    a.attname::text AS column_name, \
                    EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid) \
                        AS is_constraint \
             FROM pg_class t \
             JOIN pg_index ix ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             WHERE n.nspname = 'public' AND t.relkind = 'r' \
             ORDER BY t.relname, i.relname, array_position(ix.indkey::int2[], a.attnum)",
            &[],
        )
        .await?;

    let mut grouped: BTreeMap<(String, String), (bool, bool, bool, Vec<String>)> = BTreeMap::new();
    for row in &index_rows {
        let table_name = row.get_string("table_name")?;
        let index_name = row.get_string("index_name")?;
        let entry = grouped
            .entry((table_name, index_name))
            .or_insert_with(|| (false, false, false, Vec::new()));
        entry.0 = row.get_bool("is_unique")?;
        entry.1 = row.get_bool("is_primary")?;
        entry.2 = row.get_bool("is_constraint")?;
        entry.3.push(row.get_string("column_name")?);
    }

    for ((table_name, index_name), (unique, primary, constraint, columns)) in grouped {
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        if primary {
            apply_primary_key(table, &columns);
        } else if constraint && unique && columns.len() == 1 {
            if let Some(column) = table.columns.iter_mut().find(|c| c.name == columns[0]) {
                column.unique = true;
            }
        } else if !constraint {
            table.indexes.push(IndexDef {
                name: Some(index_name),
                columns,
                unique,
            });
        }
    }

    Ok(SchemaSnapshot { tables })
}

// ---------------------------------------------------------------------------
// MySQL
// ---------------------------------------------------------------------------

async fn mysql_snapshot(conn: &dyn DatabaseConnection) -> Result<SchemaSnapshot> {
    let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();

    let table_rows = conn
        .query(
            "SELECT TABLE_NAME AS table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
            &[],
        )
        .await?;
    for row in &table_rows {
        let name = row.get_string("table_name")?;
        tables.insert(
            name.clone(),
            TableDef {
                name,
                ..Default::default()
            },
        );
    }

    let column_rows = conn
        .query(
            "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, \
                    COLUMN_TYPE AS column_type, IS_NULLABLE AS is_nullable, \
                    COLUMN_DEFAULT AS column_default, COLUMN_KEY AS column_key \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
            &[],
        )
        .await?;
    let mut primary_keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in &column_rows {
        let table_name = row.get_string("table_name")?;
        let column_name = row.get_string("column_name")?;
        // COLUMN_TYPE carries the full spelling ("varchar(255)", "tinyint(1)")
        let raw = row.get_string("column_type")?;
        let nullable = row.get_string("is_nullable")? == "YES";
        let default_value = row.try_get_string("column_default")?;
        let key = row.try_get_string("column_key")?.unwrap_or_default();

        if key == "PRI" {
            primary_keys
                .entry(table_name.clone())
                .or_default()
                .push(column_name.clone());
        }

        let table = tables
            .get_mut(&table_name)
            .ok_or_else(|| introspection_error(&table_name, "column without table"))?;
        table.columns.push(ColumnDef {
            name: column_name,
            column_type: parse_type(DatabaseType::MySql, &raw),
            nullable,
            default_value,
            unique: key == "UNI",
            primary_key: false,
        });
    }
    for (table_name, columns) in primary_keys {
        if let Some(table) = tables.get_mut(&table_name) {
            apply_primary_key(table, &columns);
        }
    }

    let index_rows = conn
        .query(
            "SELECT TABLE_NAME AS table_name, INDEX_NAME AS index_name, \
                    CAST(NON_UNIQUE AS SIGNED) AS non_unique, COLUMN_NAME AS column_name \
             FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND INDEX_NAME <> 'PRIMARY' \
             ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX",
            &[],
        )
        .await?;
    let mut grouped: BTreeMap<(String, String), (bool, Vec<String>)> = BTreeMap::new();
    for row in &index_rows {
        let table_name = row.get_string("table_name")?;
        let index_name = row.get_string("index_name")?;
        let entry = grouped
            .entry((table_name, index_name))
            .or_insert_with(|| (false, Vec::new()));
        entry.0 = row.get_i64("non_unique")? == 0;
        entry.1.push(row.get_string("column_name")?);
    }
    for ((table_name, index_name), (unique, columns)) in grouped {
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        // Inline UNIQUE columns come back as a unique index named after the
        // column; those are already captured as column flags
        if unique && columns.len() == 1 && index_name == columns[0] {
            continue;
        }
        table.indexes.push(IndexDef {
            name: Some(index_name),
            columns,
            unique,
        });
    }

    Ok(SchemaSnapshot { tables })
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

async fn sqlite_snapshot(conn: &dyn DatabaseConnection) -> Result<SchemaSnapshot> {
    let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();

    let table_rows = conn
        .query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
            &[],
        )
        .await?;

    // No batched catalog here; PRAGMA is per table (not per column)
    for row in &table_rows {
        let table_name = row.get_string("name")?;
        let mut table = TableDef {
            name: table_name.clone(),
            ..Default::default()
        };

        let column_rows = conn
            .query(
                &format!("PRAGMA table_info(\"{}\")", table_name),
                &[],
            )
            .await?;
        if column_rows.is_empty() {
            return Err(introspection_error(&table_name, "PRAGMA table_info returned nothing"));
        }

        let mut pk_columns: Vec<(i64, String)> = Vec::new();
        for column_row in &column_rows {
            let column_name = column_row.get_string("name")?;
            let raw = column_row.get_string("type")?;
            let not_null = column_row.get_i64("notnull")? != 0;
            let default_value = column_row.try_get_string("dflt_value")?;
            let pk = column_row.get_i64("pk")?;
            if pk > 0 {
                pk_columns.push((pk, column_name.clone()));
            }
            // Normalize the declared spelling down to the storage class the
            // target side is normalized to as well
            let parsed = parse_type(DatabaseType::Sqlite, &raw);
            table.columns.push(ColumnDef {
                name: column_name,
                column_type: storage_type(DatabaseType::Sqlite, &parsed),
                nullable: !not_null,
                default_value,
                unique: false,
                primary_key: false,
            });
        }
        pk_columns.sort_by_key(|(order, _)| *order);
        let pk: Vec<String> = pk_columns.into_iter().map(|(_, name)| name).collect();
        apply_primary_key(&mut table, &pk);

        let index_rows = conn
            .query(&format!("PRAGMA index_list(\"{}\")", table_name), &[])
            .await?;
        for index_row in &index_rows {
            let index_name = index_row.get_string("name")?;
            let origin = index_row.try_get_string("origin")?.unwrap_or_default();
            let unique = index_row.get_i64("unique")? != 0;
            if index_name.starts_with("sqlite_autoindex") {
                continue;
            }
            let column_rows = conn
                .query(&format!("PRAGMA index_info(\"{}\")", index_name), &[])
                .await?;
            let mut columns = Vec::new();
            for column_row in &column_rows {
                columns.push(column_row.get_string("name")?);
            }
            // Inline UNIQUE constraints surface as origin 'u'; keep them as
            // column flags rather than standalone indexes
            if origin == "u" && columns.len() == 1 {
                if let Some(column) = table.columns.iter_mut().find(|c| c.name == columns[0]) {
                    column.unique = true;
                }
                continue;
            }
            table.indexes.push(IndexDef {
                name: Some(index_name),
                columns,
                unique,
            });
        }

        tables.insert(table_name, table);
    }

    Ok(SchemaSnapshot { tables })
}

fn apply_primary_key(table: &mut TableDef, columns: &[String]) {
    match columns {
        [] => {}
        [single] => {
            if let Some(column) = table.columns.iter_mut().find(|c| &c.name == single) {
                column.primary_key = true;
                column.nullable = false;
            }
        }
        composite => table.primary_key = Some(composite.to_vec()),
    }
}

// ---------------------------------------------------------------------------
// Snapshot cache
// ---------------------------------------------------------------------------

/// Live-snapshot cache keyed by dialect and connection identity.
///
/// Skips redundant introspection within a detection cycle; every successful
/// apply invalidates the target's entry so the post-apply verification
/// re-reads the real catalog.
#[derive(Default)]
pub struct SnapshotCache {
    entries: DashMap<String, Arc<SchemaSnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_key(dialect: DatabaseType, identity: &str) -> String {
        format!("{}:{}", dialect, identity)
    }

    pub fn get(&self, key: &str) -> Option<Arc<SchemaSnapshot>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn store(&self, key: String, snapshot: Arc<SchemaSnapshot>) {
        self.entries.insert(key, snapshot);
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn registry() -> ModelRegistry {
        ModelRegistry::new(vec![TableDef {
            name: "users".to_string(),
            columns: vec![
                ColumnDef {
                    name: "id".to_string(),
                    column_type: ColumnType::Uuid,
                    nullable: false,
                    primary_key: true,
                    ..Default::default()
                },
                ColumnDef {
                    name: "age".to_string(),
                    column_type: ColumnType::SmallInt,
                    nullable: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }])
    }

    #[test]
    fn target_snapshot_normalizes_per_dialect() {
        let on_postgres = build_target_snapshot(&registry(), DatabaseType::Postgres).unwrap();
        assert_eq!(
            on_postgres.table("users").unwrap().column("id").unwrap().column_type,
            ColumnType::Uuid
        );

        let on_mysql = build_target_snapshot(&registry(), DatabaseType::MySql).unwrap();
        assert_eq!(
            on_mysql.table("users").unwrap().column("id").unwrap().column_type,
            ColumnType::Varchar(36)
        );

        let on_sqlite = build_target_snapshot(&registry(), DatabaseType::Sqlite).unwrap();
        assert_eq!(
            on_sqlite.table("users").unwrap().column("age").unwrap().column_type,
            ColumnType::BigInt
        );
    }

    #[test]
    fn target_snapshot_rejects_invalid_models() {
        let mut bad = registry();
        bad.tables[0].columns[0].nullable = true;
        assert!(build_target_snapshot(&bad, DatabaseType::Postgres).is_err());
    }

    #[test]
    fn cache_round_trip_and_invalidation() {
        let cache = SnapshotCache::new();
        let key = SnapshotCache::cache_key(DatabaseType::Sqlite, "sqlite:/tmp/a.db");
        assert!(cache.get(&key).is_none());

        let snapshot = Arc::new(
            build_target_snapshot(&registry(), DatabaseType::Sqlite).unwrap(),
        );
        cache.store(key.clone(), Arc::clone(&snapshot));
        assert_eq!(
            cache.get(&key).unwrap().content_hash(),
            snapshot.content_hash()
        );

        cache.invalidate(&key);
        assert!(cache.get(&key).is_none());
    }
}
