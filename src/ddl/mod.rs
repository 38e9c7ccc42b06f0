//! Dialect-specific DDL generation.
//!
//! Each dialect implements [`SqlDialect`] as a pure (operation, dialect) ->
//! statements mapping; a capability table keyed by [`DatabaseType`] decides
//! per operation whether the native in-place ALTER form is usable or whether
//! the copy-swap-drop rebuild has to stand in.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::database::DatabaseType;
use crate::diff::ChangeOperation;
use crate::error::{Error, Result, sql_generation_error};
use crate::schema::{ColumnDef, ColumnType, IndexDef, TableDef};

mod mysql;
mod postgres;
pub mod rebuild;
mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Which mutual-exclusion primitive the dialect offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// Session-scoped advisory lock (Postgres)
    Advisory,
    /// Named server-side lock function (MySQL GET_LOCK)
    NamedLock,
    /// No server primitive; lock file with heartbeat
    File,
}

/// Per-dialect feature matrix consulted by the generator, the executor and
/// the lock coordinator.
#[derive(Debug, Clone)]
pub struct DialectCapabilities {
    /// DDL participates in transactions (all-or-nothing apply)
    pub transactional_ddl: bool,
    pub native_add_column: bool,
    pub native_drop_column: bool,
    pub native_alter_type: bool,
    pub native_alter_nullable: bool,
    pub lock_strategy: LockStrategy,
}

static CAPABILITIES: Lazy<HashMap<DatabaseType, DialectCapabilities>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        DatabaseType::Postgres,
        DialectCapabilities {
            transactional_ddl: true,
            native_add_column: true,
            native_drop_column: true,
            native_alter_type: true,
            native_alter_nullable: true,
            lock_strategy: LockStrategy::Advisory,
        },
    );
    table.insert(
        DatabaseType::MySql,
        DialectCapabilities {
            // Every DDL statement commits implicitly
            transactional_ddl: false,
            native_add_column: true,
            native_drop_column: true,
            native_alter_type: true,
            native_alter_nullable: true,
            lock_strategy: LockStrategy::NamedLock,
        },
    );
    table.insert(
        DatabaseType::Sqlite,
        DialectCapabilities {
            transactional_ddl: true,
            // ADD COLUMN works with restrictions; everything else rebuilds
            native_add_column: true,
            native_drop_column: false,
            native_alter_type: false,
            native_alter_nullable: false,
            lock_strategy: LockStrategy::File,
        },
    );
    table
});

/// Look up the capability row for a dialect.
pub fn capabilities(db_type: DatabaseType) -> &'static DialectCapabilities {
    CAPABILITIES
        .get(&db_type)
        .expect("capability table covers every DatabaseType")
}

/// Get the dialect implementation for a database type.
pub fn dialect(db_type: DatabaseType) -> &'static dyn SqlDialect {
    match db_type {
        DatabaseType::Postgres => &PostgresDialect,
        DatabaseType::MySql => &MySqlDialect,
        DatabaseType::Sqlite => &SqliteDialect,
    }
}

/// Trait defining dialect-specific SQL generation.
pub trait SqlDialect: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Get the character used to quote identifiers
    fn identifier_quote_char(&self) -> char;

    /// Quote an identifier (table, column name) for the database
    fn quote_identifier(&self, identifier: &str) -> String {
        let q = self.identifier_quote_char();
        format!("{}{}{}", q, identifier, q)
    }

    /// Escape a string literal for SQL
    fn escape_string_literal(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    /// Map a canonical column type to the dialect's type spelling
    fn map_column_type(&self, column_type: &ColumnType) -> String;

    /// Cast expression used when copying between differing column types
    fn cast_expr(&self, column_expr: &str, target: &ColumnType) -> String {
        format!("CAST({} AS {})", column_expr, self.map_column_type(target))
    }

    /// Generate a full column definition fragment
    fn column_definition_sql(&self, column: &ColumnDef) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.map_column_type(&column.column_type),
        ];
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default_value {
            parts.push(format!("DEFAULT {}", default));
        }
        if column.unique && !column.primary_key {
            parts.push("UNIQUE".to_string());
        }
        parts.join(" ")
    }

    /// Generate CREATE TABLE for a table definition
    fn create_table_sql(&self, table: &TableDef) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition_sql(c))
            .collect();

        let pk = table.primary_key_columns();
        if !pk.is_empty() {
            let cols: Vec<String> = pk.iter().map(|c| self.quote_identifier(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            parts.join(",\n  ")
        )
    }

    /// Generate DROP TABLE
    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }

    /// Generate ALTER TABLE ... ADD COLUMN. May be refused with
    /// `UnsupportedFeature` when the dialect restricts the form, in which
    /// case the generator falls back to a rebuild.
    fn add_column_sql(&self, table: &str, column: &ColumnDef) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition_sql(column)
        ))
    }

    /// Generate ALTER TABLE ... DROP COLUMN
    fn drop_column_sql(&self, table: &str, column: &str) -> Result<String>;

    /// Generate statements for an in-place column type change
    fn alter_column_type_sql(
        &self,
        table: &str,
        column: &str,
        to: &ColumnType,
        nullable: bool,
    ) -> Result<Vec<String>>;

    /// Generate statements for an in-place nullability change. Tightening
    /// with a default backfills NULLs first.
    fn alter_nullable_sql(
        &self,
        table: &str,
        column: &str,
        column_type: &ColumnType,
        nullable: bool,
        default_value: Option<&str>,
    ) -> Result<Vec<String>>;

    /// Generate CREATE INDEX
    fn create_index_sql(&self, table: &str, index: &IndexDef) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let cols: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            self.quote_identifier(&index.resolved_name(table)),
            self.quote_identifier(table),
            cols.join(", ")
        )
    }

    /// Generate DROP INDEX
    fn drop_index_sql(&self, table: &str, index_name: &str) -> String;

    /// Generate ALTER TABLE ... RENAME TO
    fn rename_table_sql(&self, old_table: &str, new_table: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(old_table),
            self.quote_identifier(new_table)
        )
    }

    /// Statement suspending referential-integrity enforcement for the
    /// session, if the dialect needs/offers one during rebuilds.
    fn suspend_integrity_sql(&self) -> Option<String>;

    /// Statement restoring (and where possible re-validating) enforcement.
    fn restore_integrity_sql(&self) -> Vec<String>;
}

/// Turns change operations into executable statements for one dialect,
/// choosing between the native and the copy-swap-drop strategy.
pub struct DdlGenerator {
    dialect: &'static dyn SqlDialect,
    caps: &'static DialectCapabilities,
    allow_truncating_copy: bool,
}

impl DdlGenerator {
    pub fn new(db_type: DatabaseType, allow_truncating_copy: bool) -> Self {
        Self {
            dialect: dialect(db_type),
            caps: capabilities(db_type),
            allow_truncating_copy,
        }
    }

    pub fn dialect(&self) -> &'static dyn SqlDialect {
        self.dialect
    }

    pub fn capabilities(&self) -> &'static DialectCapabilities {
        self.caps
    }

    /// Generate forward DDL for one operation.
    ///
    /// `live_table` is the current definition of the affected table; the
    /// rebuild strategy needs it to project row copies. Operations on new
    /// tables may pass `None`.
    pub fn generate(
        &self,
        op: &ChangeOperation,
        live_table: Option<&TableDef>,
    ) -> Result<Vec<String>> {
        self.generate_inner(op, live_table, self.allow_truncating_copy)
    }

    /// Generate best-effort rollback DDL: the forward DDL of the inverse
    /// operation. Rollback of a widening is a narrowing, so truncation is
    /// permitted here; the statements are stored for operators, never run
    /// automatically.
    pub fn generate_rollback(
        &self,
        op: &ChangeOperation,
        live_table: Option<&TableDef>,
    ) -> Result<Vec<String>> {
        let inverse = match op {
            ChangeOperation::AddTable { table } => ChangeOperation::DropTable {
                table: table.clone(),
            },
            ChangeOperation::DropTable { table } => ChangeOperation::AddTable {
                table: table.clone(),
            },
            ChangeOperation::AddColumn { table, column } => ChangeOperation::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            ChangeOperation::DropColumn { table, column } => ChangeOperation::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            ChangeOperation::AlterColumnType {
                table,
                column,
                from,
                to,
                nullable,
            } => ChangeOperation::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                from: to.clone(),
                to: from.clone(),
                nullable: *nullable,
            },
            ChangeOperation::AlterNullable {
                table,
                column,
                column_type,
                from,
                to,
                default_value,
            } => ChangeOperation::AlterNullable {
                table: table.clone(),
                column: column.clone(),
                column_type: column_type.clone(),
                from: *to,
                to: *from,
                default_value: default_value.clone(),
            },
            ChangeOperation::AddIndex { table, index } => ChangeOperation::DropIndex {
                table: table.clone(),
                index: index.clone(),
            },
            ChangeOperation::DropIndex { table, index } => ChangeOperation::AddIndex {
                table: table.clone(),
                index: index.clone(),
            },
        };

        // The inverse applies against the post-apply shape of the table.
        let post_table = live_table.map(|t| op.apply_to_table(t));
        self.generate_inner(&inverse, post_table.as_ref(), true)
    }

    /// The additive half of a two-phase narrowing: add a shadow column of
    /// the target type and backfill it. The swap/drop half belongs to a
    /// later, explicitly risk-gated plan once the model switches over.
    pub fn narrowing_additive_half(&self, op: &ChangeOperation) -> Result<Vec<String>> {
        let ChangeOperation::AlterColumnType {
            table, column, to, ..
        } = op
        else {
            return Err(sql_generation_error(
                "two-phase migration only applies to column type changes",
            ));
        };
        let shadow = ColumnDef {
            name: format!("{}__pending", column),
            column_type: to.clone(),
            nullable: true,
            ..Default::default()
        };
        let add = self.dialect.add_column_sql(table, &shadow)?;
        let backfill = format!(
            "UPDATE {} SET {} = {}",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(&shadow.name),
            self.dialect
                .cast_expr(&self.dialect.quote_identifier(column), to),
        );
        Ok(vec![add, backfill])
    }

    fn generate_inner(
        &self,
        op: &ChangeOperation,
        live_table: Option<&TableDef>,
        allow_truncating: bool,
    ) -> Result<Vec<String>> {
        match op {
            ChangeOperation::AddTable { table } => {
                let mut statements = vec![self.dialect.create_table_sql(table)];
                for index in &table.indexes {
                    statements.push(self.dialect.create_index_sql(&table.name, index));
                }
                Ok(statements)
            }
            ChangeOperation::DropTable { table } => {
                Ok(vec![self.dialect.drop_table_sql(&table.name)])
            }
            ChangeOperation::AddColumn { table, column } => {
                if self.caps.native_add_column {
                    match self.dialect.add_column_sql(table, column) {
                        Ok(sql) => return Ok(vec![sql]),
                        // Restricted form (e.g. SQLite NOT NULL without
                        // default); fall through to the rebuild
                        Err(Error::UnsupportedFeature(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                self.rebuild(op, live_table)
            }
            ChangeOperation::DropColumn { table, column } => {
                if self.caps.native_drop_column {
                    Ok(vec![self.dialect.drop_column_sql(table, &column.name)?])
                } else {
                    self.rebuild(op, live_table)
                }
            }
            ChangeOperation::AlterColumnType {
                table,
                column,
                from,
                to,
                nullable,
            } => {
                if !from.widens_to(to) && !allow_truncating {
                    return Err(Error::UnsupportedFeature(format!(
                        "narrowing '{}.{}' from {} to {} can lose data; set allow_truncating_copy \
                         to truncate in place, or use the two-phase add/backfill path",
                        table, column, from, to
                    )));
                }
                if self.caps.native_alter_type {
                    self.dialect
                        .alter_column_type_sql(table, column, to, *nullable)
                } else {
                    self.rebuild(op, live_table)
                }
            }
            ChangeOperation::AlterNullable {
                table,
                column,
                column_type,
                to,
                default_value,
                ..
            } => {
                if self.caps.native_alter_nullable {
                    self.dialect.alter_nullable_sql(
                        table,
                        column,
                        column_type,
                        *to,
                        default_value.as_deref(),
                    )
                } else {
                    self.rebuild(op, live_table)
                }
            }
            ChangeOperation::AddIndex { table, index } => {
                Ok(vec![self.dialect.create_index_sql(table, index)])
            }
            ChangeOperation::DropIndex { table, index } => Ok(vec![
                self.dialect
                    .drop_index_sql(table, &index.resolved_name(table)),
            ]),
        }
    }

    fn rebuild(&self, op: &ChangeOperation, live_table: Option<&TableDef>) -> Result<Vec<String>> {
        let live = live_table.ok_or_else(|| {
            sql_generation_error(format!(
                "{} requires a table rebuild but no live definition of '{}' is available",
                op.describe(),
                op.table_name()
            ))
        })?;
        let target = op.apply_to_table(live);
        rebuild::copy_swap_drop(self.dialect, live, &target, self.allow_truncating_copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> TableDef {
        TableDef {
            name: "items".to_string(),
            columns: vec![
                ColumnDef {
                    name: "id".to_string(),
                    column_type: ColumnType::BigInt,
                    nullable: false,
                    primary_key: true,
                    ..Default::default()
                },
                ColumnDef {
                    name: "name".to_string(),
                    column_type: ColumnType::Varchar(120),
                    nullable: false,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn capability_table_covers_all_dialects() {
        assert!(capabilities(DatabaseType::Postgres).transactional_ddl);
        assert!(!capabilities(DatabaseType::MySql).transactional_ddl);
        assert!(!capabilities(DatabaseType::Sqlite).native_drop_column);
        assert_eq!(
            capabilities(DatabaseType::Sqlite).lock_strategy,
            LockStrategy::File
        );
    }

    #[test]
    fn add_table_includes_indexes() {
        let mut table = items();
        table.indexes.push(IndexDef {
            name: None,
            columns: vec!["name".to_string()],
            unique: false,
        });
        let generator = DdlGenerator::new(DatabaseType::Postgres, false);
        let statements = generator
            .generate(&ChangeOperation::AddTable { table }, None)
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE \"items\""));
        assert!(statements[1].contains("CREATE INDEX \"items_name_idx\""));
    }

    #[test]
    fn narrowing_without_opt_in_is_refused() {
        let generator = DdlGenerator::new(DatabaseType::Postgres, false);
        let op = ChangeOperation::AlterColumnType {
            table: "items".to_string(),
            column: "name".to_string(),
            from: ColumnType::Varchar(120),
            to: ColumnType::Varchar(40),
            nullable: false,
        };
        let err = generator.generate(&op, Some(&items())).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
        assert!(err.to_string().contains("allow_truncating_copy"));
    }

    #[test]
    fn narrowing_additive_half_adds_and_backfills() {
        let generator = DdlGenerator::new(DatabaseType::Postgres, false);
        let op = ChangeOperation::AlterColumnType {
            table: "items".to_string(),
            column: "name".to_string(),
            from: ColumnType::Varchar(120),
            to: ColumnType::Varchar(40),
            nullable: false,
        };
        let statements = generator.narrowing_additive_half(&op).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("ADD COLUMN \"name__pending\" VARCHAR(40)"));
        assert!(statements[1].starts_with("UPDATE \"items\" SET \"name__pending\""));
    }

    #[test]
    fn rollback_of_add_column_is_a_drop() {
        let generator = DdlGenerator::new(DatabaseType::Postgres, false);
        let op = ChangeOperation::AddColumn {
            table: "items".to_string(),
            column: ColumnDef {
                name: "stock".to_string(),
                column_type: ColumnType::Integer,
                ..Default::default()
            },
        };
        let rollback = generator.generate_rollback(&op, Some(&items())).unwrap();
        assert_eq!(
            rollback,
            vec!["ALTER TABLE \"items\" DROP COLUMN \"stock\"".to_string()]
        );
    }

    #[test]
    fn sqlite_drop_column_takes_the_rebuild_path() {
        let generator = DdlGenerator::new(DatabaseType::Sqlite, false);
        let table = items();
        let op = ChangeOperation::DropColumn {
            table: "items".to_string(),
            column: table.columns[1].clone(),
        };
        let statements = generator.generate(&op, Some(&table)).unwrap();
        assert!(statements.iter().any(|s| s.contains("items__rebuild")));
        assert!(statements.iter().any(|s| s.starts_with("INSERT INTO")));
        assert!(statements.iter().any(|s| s.contains("RENAME TO")));
    }
}
