use crate::database::DatabaseType;
use crate::ddl::SqlDialect;
use crate::error::Result;
use crate::schema::ColumnType;

/// MySQL dialect.
///
/// Targets MySQL >= 5.7. In-place ALTER is expressed through MODIFY COLUMN,
/// which always restates the full column definition.
#[derive(Debug, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn identifier_quote_char(&self) -> char {
        '`'
    }

    fn map_column_type(&self, column_type: &ColumnType) -> String {
        use ColumnType::*;
        match column_type {
            Boolean => "TINYINT(1)".to_string(),
            SmallInt => "SMALLINT".to_string(),
            Integer => "INT".to_string(),
            BigInt => "BIGINT".to_string(),
            Float => "FLOAT".to_string(),
            Double => "DOUBLE".to_string(),
            Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            Varchar(n) => format!("VARCHAR({})", n),
            Text => "TEXT".to_string(),
            Date => "DATE".to_string(),
            Time => "TIME".to_string(),
            Timestamp => "DATETIME".to_string(),
            TimestampTz => "TIMESTAMP".to_string(),
            Json => "JSON".to_string(),
            Uuid => "CHAR(36)".to_string(),
            Blob => "BLOB".to_string(),
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
        nullable: bool,
    ) -> Result<Vec<String>> {
        let null_sql = if nullable { "NULL" } else { "NOT NULL" };
        Ok(vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {} {} {}",
            self.quote_identifier(table),
            self.quote_identifier(column),
            self.map_column_type(to),
            null_sql
        )])
    }

    fn alter_nullable_sql(
        &self,
        table: &str,
        column: &str,
        column_type: &ColumnType,
        nullable: bool,
        default_value: Option<&str>,
    ) -> Result<Vec<String>> {
        let quoted_table = self.quote_identifier(table);
        let quoted_column = self.quote_identifier(column);
        let mut statements = Vec::new();
        if !nullable {
            if let Some(default) = default_value {
                statements.push(format!(
                    "UPDATE {} SET {} = {} WHERE {} IS NULL",
                    quoted_table, quoted_column, default, quoted_column
                ));
            }
        }
        let null_sql = if nullable { "NULL" } else { "NOT NULL" };
        statements.push(format!(
            "ALTER TABLE {} MODIFY COLUMN {} {} {}",
            quoted_table,
            quoted_column,
            self.map_column_type(column_type),
            null_sql
        ));
        Ok(statements)
    }

    fn drop_index_sql(&self, table: &str, index_name: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(index_name),
            self.quote_identifier(table)
        )
    }

    fn suspend_integrity_sql(&self) -> Option<String> {
        Some("SET FOREIGN_KEY_CHECKS = 0".to_string())
    }

    fn restore_integrity_sql(&self) -> Vec<String> {
        vec!["SET FOREIGN_KEY_CHECKS = 1".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_column_restates_nullability() {
        let dialect = MySqlDialect;
        let statements = dialect
            .alter_column_type_sql("items", "name", &ColumnType::Text, false)
            .unwrap();
        assert_eq!(
            statements,
            vec!["ALTER TABLE `items` MODIFY COLUMN `name` TEXT NOT NULL".to_string()]
        );
    }

    #[test]
    fn drop_index_names_the_table() {
        let dialect = MySqlDialect;
        assert_eq!(
            dialect.drop_index_sql("items", "items_name_idx"),
            "DROP INDEX `items_name_idx` ON `items`"
        );
    }

    #[test]
    fn boolean_maps_to_tinyint1() {
        let dialect = MySqlDialect;
        assert_eq!(dialect.map_column_type(&ColumnType::Boolean), "TINYINT(1)");
        assert_eq!(dialect.map_column_type(&ColumnType::Uuid), "CHAR(36)");
    }
}
