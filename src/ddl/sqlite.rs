use crate::database::DatabaseType;
use crate::ddl::SqlDialect;
use crate::error::{Result, unsupported_feature_error};
use crate::schema::{ColumnDef, ColumnType};

/// SQLite dialect.
///
/// SQLite has a deliberately small ALTER TABLE: columns can be added (with
/// restrictions) and tables renamed, and that is all. Every other change
/// goes through the copy-swap-drop rebuild, which is why the methods below
/// refuse rather than guess.
#[derive(Debug, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn identifier_quote_char(&self) -> char {
        '"'
    }

    fn map_column_type(&self, column_type: &ColumnType) -> String {
        use ColumnType::*;
        // SQLite has a flexible type system with only a few storage classes
        match column_type {
            Boolean | SmallInt | Integer | BigInt => "INTEGER".to_string(),
            Float | Double => "REAL".to_string(),
            Decimal(_, _) => "NUMERIC".to_string(),
            Varchar(_) | Text | Date | Time | Timestamp | TimestampTz | Json | Uuid => {
                "TEXT".to_string()
            }
            Blob => "BLOB".to_string(),
            Custom(custom) => custom.clone(),
        }
    }

    fn add_column_sql(&self, table: &str, column: &ColumnDef) -> Result<String> {
        // ALTER TABLE ADD COLUMN restrictions:
        // - no PRIMARY KEY or UNIQUE
        // - NOT NULL only with a DEFAULT value
        if column.primary_key {
            return Err(unsupported_feature_error(
                "SQLite cannot add a PRIMARY KEY column to an existing table",
            ));
        }
        if column.unique {
            return Err(unsupported_feature_error(
                "SQLite cannot add a UNIQUE column to an existing table",
            ));
        }
        if !column.nullable && column.default_value.is_none() {
            return Err(unsupported_feature_error(
                "SQLite cannot add a NOT NULL column without a DEFAULT value to an existing table",
            ));
        }
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition_sql(column)
        ))
    }

    fn drop_column_sql(&self, _table: &str, _column: &str) -> Result<String> {
        Err(unsupported_feature_error(
            "SQLite DROP COLUMN is unreliable across versions; the table is recreated instead",
        ))
    }

    fn alter_column_type_sql(
        &self,
        _table: &str,
        _column: &str,
        _to: &ColumnType,
        _nullable: bool,
    ) -> Result<Vec<String>> {
        Err(unsupported_feature_error(
            "SQLite cannot change a column type in place; the table is recreated instead",
        ))
    }

    fn alter_nullable_sql(
        &self,
        _table: &str,
        _column: &str,
        _column_type: &ColumnType,
        _nullable: bool,
        _default_value: Option<&str>,
    ) -> Result<Vec<String>> {
        Err(unsupported_feature_error(
            "SQLite cannot change column nullability in place; the table is recreated instead",
        ))
    }

    fn drop_index_sql(&self, _table: &str, index_name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote_identifier(index_name))
    }

    fn suspend_integrity_sql(&self) -> Option<String> {
        // Works inside a transaction, unlike PRAGMA foreign_keys
        Some("PRAGMA defer_foreign_keys = ON".to_string())
    }

    fn restore_integrity_sql(&self) -> Vec<String> {
        // Enforcement resumes at commit; the check re-validates what the
        // rebuild produced
        vec!["PRAGMA foreign_key_check".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_classes() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.map_column_type(&ColumnType::Varchar(120)), "TEXT");
        assert_eq!(dialect.map_column_type(&ColumnType::Boolean), "INTEGER");
        assert_eq!(dialect.map_column_type(&ColumnType::Double), "REAL");
        assert_eq!(dialect.map_column_type(&ColumnType::Uuid), "TEXT");
    }

    #[test]
    fn add_column_restrictions() {
        let dialect = SqliteDialect;
        let ok = ColumnDef {
            name: "stock".to_string(),
            column_type: ColumnType::Integer,
            nullable: false,
            default_value: Some("0".to_string()),
            ..Default::default()
        };
        assert_eq!(
            dialect.add_column_sql("items", &ok).unwrap(),
            "ALTER TABLE \"items\" ADD COLUMN \"stock\" INTEGER NOT NULL DEFAULT 0"
        );

        let not_null_no_default = ColumnDef {
            name: "stock".to_string(),
            column_type: ColumnType::Integer,
            nullable: false,
            ..Default::default()
        };
        assert!(dialect.add_column_sql("items", &not_null_no_default).is_err());

        let unique = ColumnDef {
            name: "sku".to_string(),
            column_type: ColumnType::Text,
            unique: true,
            ..Default::default()
        };
        assert!(dialect.add_column_sql("items", &unique).is_err());
    }

    #[test]
    fn in_place_alters_are_refused() {
        let dialect = SqliteDialect;
        assert!(dialect.drop_column_sql("items", "name").is_err());
        assert!(
            dialect
                .alter_column_type_sql("items", "name", &ColumnType::Text, true)
                .is_err()
        );
    }
}
