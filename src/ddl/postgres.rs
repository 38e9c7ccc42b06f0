use crate::database::DatabaseType;
use crate::ddl::SqlDialect;
use crate::error::Result;
use crate::schema::ColumnType;

/// PostgreSQL dialect. Full in-place ALTER support; the rebuild strategy is
/// never needed here.
#[derive(Debug, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn identifier_quote_char(&self) -> char {
        '"'
    }

    fn map_column_type(&self, column_type: &ColumnType) -> String {
        use ColumnType::*;
        match column_type {
            Boolean => "BOOLEAN".to_string(),
            SmallInt => "SMALLINT".to_string(),
            Integer => "INTEGER".to_string(),
            BigInt => "BIGINT".to_string(),
            Float => "REAL".to_string(),
            Double => "DOUBLE PRECISION".to_string(),
            Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
            Varchar(n) => format!("VARCHAR({})", n),
            Text => "TEXT".to_string(),
            Date => "DATE".to_string(),
            Time => "TIME WITHOUT TIME ZONE".to_string(),
            Timestamp => "TIMESTAMP WITHOUT TIME ZONE".to_string(),
            TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
            Json => "JSONB".to_string(),
            Uuid => "UUID".to_string(),
            Blob => "BYTEA".to_string(),
            Custom(custom) => custom.clone(),
        }
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        ))
    }

    fn alter_column_type_sql(
        &self,
        table: &str,
        column: &str,
        to: &ColumnType,
        _nullable: bool,
    ) -> Result<Vec<String>> {
        let quoted_column = self.quote_identifier(column);
        Ok(vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}",
            self.quote_identifier(table),
            quoted_column,
            self.map_column_type(to),
            self.cast_expr(&quoted_column, to)
        )])
    }

    fn alter_nullable_sql(
        &self,
        table: &str,
        column: &str,
        _column_type: &ColumnType,
        nullable: bool,
        default_value: Option<&str>,
    ) -> Result<Vec<String>> {
        let quoted_table = self.quote_identifier(table);
        let quoted_column = self.quote_identifier(column);
        let mut statements = Vec::new();
        if nullable {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                quoted_table, quoted_column
            ));
        } else {
            // Backfill existing NULLs before tightening, or the ALTER fails
            if let Some(default) = default_value {
                statements.push(format!(
                    "UPDATE {} SET {} = {} WHERE {} IS NULL",
                    quoted_table, quoted_column, default, quoted_column
                ));
            }
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                quoted_table, quoted_column
            ));
        }
        Ok(statements)
    }

    fn drop_index_sql(&self, _table: &str, index_name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote_identifier(index_name))
    }

    fn suspend_integrity_sql(&self) -> Option<String> {
        Some("SET CONSTRAINTS ALL DEFERRED".to_string())
    }

    fn restore_integrity_sql(&self) -> Vec<String> {
        vec!["SET CONSTRAINTS ALL IMMEDIATE".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alter_type_uses_a_cast() {
        let dialect = PostgresDialect;
        let statements = dialect
            .alter_column_type_sql("items", "name", &ColumnType::Text, false)
            .unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"items\" ALTER COLUMN \"name\" TYPE TEXT USING CAST(\"name\" AS TEXT)"
                    .to_string()
            ]
        );
    }

    #[test]
    fn tightening_nullable_backfills_first() {
        let dialect = PostgresDialect;
        let statements = dialect
            .alter_nullable_sql("items", "stock", &ColumnType::Integer, false, Some("0"))
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("UPDATE \"items\" SET \"stock\" = 0"));
        assert!(statements[1].ends_with("SET NOT NULL"));
    }

    #[test]
    fn type_spellings() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.map_column_type(&ColumnType::Varchar(80)), "VARCHAR(80)");
        assert_eq!(dialect.map_column_type(&ColumnType::Double), "DOUBLE PRECISION");
        assert_eq!(dialect.map_column_type(&ColumnType::Json), "JSONB");
        assert_eq!(dialect.map_column_type(&ColumnType::Blob), "BYTEA");
    }
}
