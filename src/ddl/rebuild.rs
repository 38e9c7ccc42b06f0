//! Copy-swap-drop: the table rebuild strategy for dialects with weak
//! in-place ALTER support.
//!
//! Sequence: (1) create a shadow table in the target shape, (2) suspend
//! referential-integrity enforcement for the session, (3) copy rows through
//! a projected select, (4) drop the original, (5) rename the shadow into
//! place, (6) rebuild indexes, (7) restore and re-validate enforcement.
//! The affected table is briefly unavailable; the executor runs the whole
//! sequence under the tightest transaction scope the dialect allows.

use crate::ddl::SqlDialect;
use crate::error::{Error, Result};
use crate::schema::{ColumnType, TableDef};

/// Suffix for the shadow table while the rebuild is in flight.
pub const SHADOW_SUFFIX: &str = "__rebuild";

/// Generate the full copy-swap-drop statement sequence transforming `live`
/// into `target`. Both definitions must describe the same table name.
pub fn copy_swap_drop(
    dialect: &dyn SqlDialect,
    live: &TableDef,
    target: &TableDef,
    allow_truncating: bool,
) -> Result<Vec<String>> {
    let shadow_name = format!("{}{}", live.name, SHADOW_SUFFIX);
    let mut shadow = target.clone();
    shadow.name = shadow_name.clone();

    let mut statements = Vec::new();

    if let Some(suspend) = dialect.suspend_integrity_sql() {
        statements.push(suspend);
    }

    // Shadow table carries columns and constraints; indexes come after the
    // swap so they end up with their proper names.
    statements.push(dialect.create_table_sql(&shadow));

    statements.push(projected_copy_sql(
        dialect,
        live,
        target,
        &shadow_name,
        allow_truncating,
    )?);

    statements.push(dialect.drop_table_sql(&live.name));
    statements.push(dialect.rename_table_sql(&shadow_name, &target.name));

    for index in &target.indexes {
        statements.push(dialect.create_index_sql(&target.name, index));
    }

    statements.extend(dialect.restore_integrity_sql());

    Ok(statements)
}

/// INSERT INTO shadow SELECT ... projecting live rows into the target
/// shape: surviving columns are carried over (cast when the type changed),
/// new required columns get their default, dropped columns are omitted.
fn projected_copy_sql(
    dialect: &dyn SqlDialect,
    live: &TableDef,
    target: &TableDef,
    shadow_name: &str,
    allow_truncating: bool,
) -> Result<String> {
    let mut column_names = Vec::new();
    let mut select_exprs = Vec::new();

    for column in &target.columns {
        column_names.push(dialect.quote_identifier(&column.name));
        match live.column(&column.name) {
            Some(live_column) => {
                let quoted = dialect.quote_identifier(&column.name);
                let expr = if live_column.column_type == column.column_type {
                    quoted
                } else if live_column.column_type.widens_to(&column.column_type) {
                    dialect.cast_expr(&quoted, &column.column_type)
                } else if allow_truncating {
                    truncating_cast(dialect, &quoted, &column.column_type)
                } else {
                    return Err(Error::UnsupportedFeature(format!(
                        "rebuild of '{}' would narrow column '{}' from {} to {}; set \
                         allow_truncating_copy or migrate in two phases",
                        live.name, column.name, live_column.column_type, column.column_type
                    )));
                };
                select_exprs.push(expr);
            }
            None => {
                // New column: computed default, or NULL when it has none
                match &column.default_value {
                    Some(default) => select_exprs.push(default.clone()),
                    None => select_exprs.push("NULL".to_string()),
                }
            }
        }
    }

    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        dialect.quote_identifier(shadow_name),
        column_names.join(", "),
        select_exprs.join(", "),
        dialect.quote_identifier(&live.name)
    ))
}

fn truncating_cast(dialect: &dyn SqlDialect, column_expr: &str, target: &ColumnType) -> String {
    match target {
        // substr is understood by all three dialects
        ColumnType::Varchar(n) => dialect.cast_expr(&format!("substr({}, 1, {})", column_expr, n), target),
        _ => dialect.cast_expr(column_expr, target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::SqliteDialect;
    use crate::schema::ColumnDef;

    fn live_items() -> TableDef {
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
                    column_type: ColumnType::Text,
                    nullable: false,
                    ..Default::default()
                },
                ColumnDef {
                    name: "legacy_flag".to_string(),
                    column_type: ColumnType::BigInt,
                    nullable: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn drop_column_rebuild_omits_the_column() {
        let mut target = live_items();
        target.columns.retain(|c| c.name != "legacy_flag");

        let statements =
            copy_swap_drop(&SqliteDialect, &live_items(), &target, false).unwrap();

        // suspend, create shadow, copy, drop, rename, restore check
        assert_eq!(statements[0], "PRAGMA defer_foreign_keys = ON");
        assert!(statements[1].starts_with("CREATE TABLE \"items__rebuild\""));
        assert!(!statements[1].contains("legacy_flag"));
        assert_eq!(
            statements[2],
            "INSERT INTO \"items__rebuild\" (\"id\", \"name\") SELECT \"id\", \"name\" FROM \"items\""
        );
        assert_eq!(statements[3], "DROP TABLE IF EXISTS \"items\"");
        assert_eq!(
            statements[4],
            "ALTER TABLE \"items__rebuild\" RENAME TO \"items\""
        );
        assert_eq!(statements[5], "PRAGMA foreign_key_check");
    }

    #[test]
    fn new_required_column_copies_its_default() {
        let mut target = live_items();
        target.columns.push(ColumnDef {
            name: "stock".to_string(),
            column_type: ColumnType::BigInt,
            nullable: false,
            default_value: Some("0".to_string()),
            ..Default::default()
        });

        let statements =
            copy_swap_drop(&SqliteDialect, &live_items(), &target, false).unwrap();
        let copy = statements
            .iter()
            .find(|s| s.starts_with("INSERT INTO"))
            .unwrap();
        assert!(copy.contains("SELECT \"id\", \"name\", \"legacy_flag\", 0 FROM \"items\""));
    }

    #[test]
    fn narrowing_without_opt_in_is_refused() {
        let mut live = live_items();
        live.columns[1].column_type = ColumnType::Varchar(255);
        let mut target = live.clone();
        target.columns[1].column_type = ColumnType::Varchar(40);

        let err = copy_swap_drop(&SqliteDialect, &live, &target, false).unwrap_err();
        assert!(err.to_string().contains("narrow"));

        let statements = copy_swap_drop(&SqliteDialect, &live, &target, true).unwrap();
        let copy = statements
            .iter()
            .find(|s| s.starts_with("INSERT INTO"))
            .unwrap();
        assert!(copy.contains("substr(\"name\", 1, 40)"));
    }

    #[test]
    fn indexes_are_rebuilt_after_the_swap() {
        let mut target = live_items();
        target.columns.retain(|c| c.name != "legacy_flag");
        target.indexes.push(crate::schema::IndexDef {
            name: None,
            columns: vec!["name".to_string()],
            unique: true,
        });

        let statements =
            copy_swap_drop(&SqliteDialect, &live_items(), &target, false).unwrap();
        let rename_pos = statements.iter().position(|s| s.contains("RENAME TO")).unwrap();
        let index_pos = statements
            .iter()
            .position(|s| s.contains("CREATE UNIQUE INDEX"))
            .unwrap();
        assert!(index_pos > rename_pos);
        assert!(statements[index_pos].contains("\"items_name_idx\""));
    }
}
