//! Schema differ: compares two snapshots into an ordered change list.
//!
//! Order is deterministic so equal inputs always produce byte-identical
//! plans: table adds, then column ops, then index ops, then table drops,
//! with ties broken by table then column/index name. Later operations never
//! reference structures that don't exist yet.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnDef, ColumnType, IndexDef, SchemaSnapshot, TableDef};

/// A single schema change, carrying enough data to generate both the forward
/// DDL and a best-effort rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOperation {
    AddTable {
        table: TableDef,
    },
    DropTable {
        /// Full definition, kept so rollback can recreate the structure
        /// (though not the data).
        table: TableDef,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: ColumnDef,
    },
    AlterColumnType {
        table: String,
        column: String,
        from: ColumnType,
        to: ColumnType,
        nullable: bool,
    },
    AlterNullable {
        table: String,
        column: String,
        column_type: ColumnType,
        from: bool,
        to: bool,
        /// Default used to backfill NULLs when tightening to NOT NULL.
        default_value: Option<String>,
    },
    AddIndex {
        table: String,
        index: IndexDef,
    },
    DropIndex {
        table: String,
        index: IndexDef,
    },
}

impl ChangeOperation {
    pub fn table_name(&self) -> &str {
        match self {
            ChangeOperation::AddTable { table } | ChangeOperation::DropTable { table } => {
                &table.name
            }
            ChangeOperation::AddColumn { table, .. }
            | ChangeOperation::DropColumn { table, .. }
            | ChangeOperation::AlterColumnType { table, .. }
            | ChangeOperation::AlterNullable { table, .. }
            | ChangeOperation::AddIndex { table, .. }
            | ChangeOperation::DropIndex { table, .. } => table,
        }
    }

    /// Short human-readable summary ("DropColumn items.legacy_flag").
    pub fn describe(&self) -> String {
        match self {
            ChangeOperation::AddTable { table } => format!("AddTable {}", table.name),
            ChangeOperation::DropTable { table } => format!("DropTable {}", table.name),
            ChangeOperation::AddColumn { table, column } => {
                format!("AddColumn {}.{}", table, column.name)
            }
            ChangeOperation::DropColumn { table, column } => {
                format!("DropColumn {}.{}", table, column.name)
            }
            ChangeOperation::AlterColumnType {
                table,
                column,
                from,
                to,
                ..
            } => format!("AlterColumnType {}.{} {} -> {}", table, column, from, to),
            ChangeOperation::AlterNullable {
                table, column, to, ..
            } => {
                let target = if *to { "NULL" } else { "NOT NULL" };
                format!("AlterNullable {}.{} -> {}", table, column, target)
            }
            ChangeOperation::AddIndex { table, index } => {
                format!("AddIndex {}", index.resolved_name(table))
            }
            ChangeOperation::DropIndex { table, index } => {
                format!("DropIndex {}", index.resolved_name(table))
            }
        }
    }

    /// Project a live table definition through this operation. Used by the
    /// copy-swap-drop strategy to derive the shadow table's shape.
    pub fn apply_to_table(&self, table: &TableDef) -> TableDef {
        let mut result = table.clone();
        match self {
            ChangeOperation::AddColumn { column, .. } => {
                result.columns.push(column.clone());
            }
            ChangeOperation::DropColumn { column, .. } => {
                result.columns.retain(|c| c.name != column.name);
            }
            ChangeOperation::AlterColumnType { column, to, .. } => {
                if let Some(c) = result.columns.iter_mut().find(|c| &c.name == column) {
                    c.column_type = to.clone();
                }
            }
            ChangeOperation::AlterNullable { column, to, .. } => {
                if let Some(c) = result.columns.iter_mut().find(|c| &c.name == column) {
                    c.nullable = *to;
                }
            }
            ChangeOperation::AddIndex { index, .. } => {
                result.indexes.push(index.clone());
            }
            ChangeOperation::DropIndex { index, .. } => {
                let name = index.resolved_name(&table.name);
                result
                    .indexes
                    .retain(|i| i.resolved_name(&table.name) != name);
            }
            ChangeOperation::AddTable { .. } | ChangeOperation::DropTable { .. } => {}
        }
        result
    }
}

/// Compare two snapshots. Equal definitions never produce an operation.
///
/// Both snapshots must already be normalized to the same dialect's storage
/// types (the snapshot builders take care of that).
pub fn diff(live: &SchemaSnapshot, target: &SchemaSnapshot) -> Vec<ChangeOperation> {
    let mut added_tables = Vec::new();
    let mut column_adds = Vec::new();
    let mut column_alters = Vec::new();
    let mut column_drops = Vec::new();
    let mut index_adds = Vec::new();
    let mut index_drops = Vec::new();
    let mut dropped_tables = Vec::new();

    // BTreeMap iteration is name-sorted, which gives us the tie-break order
    // for free.
    for (name, target_table) in &target.tables {
        match live.table(name) {
            None => added_tables.push(ChangeOperation::AddTable {
                table: target_table.clone(),
            }),
            Some(live_table) => diff_table(
                live_table,
                target_table,
                &mut column_adds,
                &mut column_alters,
                &mut column_drops,
                &mut index_adds,
                &mut index_drops,
            ),
        }
    }

    for (name, live_table) in &live.tables {
        if target.table(name).is_none() {
            dropped_tables.push(ChangeOperation::DropTable {
                table: live_table.clone(),
            });
        }
    }

    let mut operations = added_tables;
    operations.extend(column_adds);
    operations.extend(column_alters);
    operations.extend(column_drops);
    operations.extend(index_adds);
    operations.extend(index_drops);
    operations.extend(dropped_tables);
    operations
}

fn diff_table(
    live: &TableDef,
    target: &TableDef,
    column_adds: &mut Vec<ChangeOperation>,
    column_alters: &mut Vec<ChangeOperation>,
    column_drops: &mut Vec<ChangeOperation>,
    index_adds: &mut Vec<ChangeOperation>,
    index_drops: &mut Vec<ChangeOperation>,
) {
    let mut target_columns: Vec<&ColumnDef> = target.columns.iter().collect();
    target_columns.sort_by(|a, b| a.name.cmp(&b.name));

    for target_column in target_columns {
        match live.column(&target_column.name) {
            None => column_adds.push(ChangeOperation::AddColumn {
                table: target.name.clone(),
                column: target_column.clone(),
            }),
            Some(live_column) => {
                if live_column.column_type != target_column.column_type {
                    column_alters.push(ChangeOperation::AlterColumnType {
                        table: target.name.clone(),
                        column: target_column.name.clone(),
                        from: live_column.column_type.clone(),
                        to: target_column.column_type.clone(),
                        nullable: target_column.nullable,
                    });
                }
                if live_column.nullable != target_column.nullable {
                    column_alters.push(ChangeOperation::AlterNullable {
                        table: target.name.clone(),
                        column: target_column.name.clone(),
                        column_type: target_column.column_type.clone(),
                        from: live_column.nullable,
                        to: target_column.nullable,
                        default_value: target_column.default_value.clone(),
                    });
                }
            }
        }
    }

    let mut live_columns: Vec<&ColumnDef> = live.columns.iter().collect();
    live_columns.sort_by(|a, b| a.name.cmp(&b.name));
    for live_column in live_columns {
        if target.column(&live_column.name).is_none() {
            column_drops.push(ChangeOperation::DropColumn {
                table: target.name.clone(),
                column: live_column.clone(),
            });
        }
    }

    diff_indexes(live, target, index_adds, index_drops);
}

fn diff_indexes(
    live: &TableDef,
    target: &TableDef,
    index_adds: &mut Vec<ChangeOperation>,
    index_drops: &mut Vec<ChangeOperation>,
) {
    let live_names: Vec<(String, &IndexDef)> = live
        .indexes
        .iter()
        .map(|i| (i.resolved_name(&live.name), i))
        .collect();
    let target_names: Vec<(String, &IndexDef)> = target
        .indexes
        .iter()
        .map(|i| (i.resolved_name(&target.name), i))
        .collect();

    let mut adds: Vec<&IndexDef> = Vec::new();
    let mut drops: Vec<&IndexDef> = Vec::new();

    for (name, target_index) in &target_names {
        match live_names.iter().find(|(n, _)| n == name) {
            None => adds.push(target_index),
            Some((_, live_index)) => {
                // Same name, different shape: rebuild the index
                if live_index.columns != target_index.columns
                    || live_index.unique != target_index.unique
                {
                    drops.push(live_index);
                    adds.push(target_index);
                }
            }
        }
    }
    for (name, live_index) in &live_names {
        if !target_names.iter().any(|(n, _)| n == name) {
            drops.push(live_index);
        }
    }

    adds.sort_by_key(|i| i.resolved_name(&target.name));
    drops.sort_by_key(|i| i.resolved_name(&live.name));

    index_adds.extend(adds.into_iter().map(|i| ChangeOperation::AddIndex {
        table: target.name.clone(),
        index: i.clone(),
    }));
    index_drops.extend(drops.into_iter().map(|i| ChangeOperation::DropIndex {
        table: live.name.clone(),
        index: i.clone(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: Vec<ColumnDef>) -> TableDef {
        TableDef {
            name: name.to_string(),
            columns,
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

    fn items_snapshot() -> SchemaSnapshot {
        SchemaSnapshot::from_tables(vec![table(
            "items",
            vec![
                column("id", ColumnType::BigInt, false),
                column("name", ColumnType::Varchar(120), false),
            ],
        )])
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let snapshot = items_snapshot();
        assert!(diff(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn added_column_is_detected() {
        let live = items_snapshot();
        let mut target = items_snapshot();
        target
            .tables
            .get_mut("items")
            .unwrap()
            .columns
            .push(ColumnDef {
                name: "stock".to_string(),
                column_type: ColumnType::Integer,
                nullable: false,
                default_value: Some("0".to_string()),
                ..Default::default()
            });

        let ops = diff(&live, &target);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].describe(), "AddColumn items.stock");
    }

    #[test]
    fn removed_column_is_a_drop_candidate() {
        let mut live = items_snapshot();
        live.tables
            .get_mut("items")
            .unwrap()
            .columns
            .push(column("legacy_flag", ColumnType::Boolean, true));
        let target = items_snapshot();

        let ops = diff(&live, &target);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], ChangeOperation::DropColumn { column, .. } if column.name == "legacy_flag"));
    }

    #[test]
    fn order_is_adds_then_columns_then_indexes_then_drops() {
        let live = SchemaSnapshot::from_tables(vec![
            table("gone", vec![column("id", ColumnType::BigInt, false)]),
            table(
                "items",
                vec![
                    column("id", ColumnType::BigInt, false),
                    column("old", ColumnType::Text, true),
                ],
            ),
        ]);
        let mut items = table(
            "items",
            vec![
                column("id", ColumnType::BigInt, false),
                column("added", ColumnType::Text, true),
            ],
        );
        items.indexes.push(IndexDef {
            name: None,
            columns: vec!["added".to_string()],
            unique: false,
        });
        let target = SchemaSnapshot::from_tables(vec![
            items,
            table("fresh", vec![column("id", ColumnType::BigInt, false)]),
        ]);

        let ops = diff(&live, &target);
        let kinds: Vec<String> = ops.iter().map(|op| op.describe()).collect();
        assert_eq!(
            kinds,
            vec![
                "AddTable fresh",
                "AddColumn items.added",
                "DropColumn items.old",
                "AddIndex items_added_idx",
                "DropTable gone",
            ]
        );
    }

    #[test]
    fn type_and_nullable_changes_both_surface() {
        let live = items_snapshot();
        let mut target = items_snapshot();
        {
            let items = target.tables.get_mut("items").unwrap();
            items.columns[1].column_type = ColumnType::Text;
            items.columns[1].nullable = true;
        }

        let ops = diff(&live, &target);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], ChangeOperation::AlterColumnType { .. }));
        assert!(matches!(ops[1], ChangeOperation::AlterNullable { .. }));
    }

    #[test]
    fn new_table_indexes_are_not_emitted_separately() {
        let live = SchemaSnapshot::new();
        let mut fresh = table("fresh", vec![column("id", ColumnType::BigInt, false)]);
        fresh.indexes.push(IndexDef {
            name: None,
            columns: vec!["id".to_string()],
            unique: true,
        });
        let target = SchemaSnapshot::from_tables(vec![fresh]);

        let ops = diff(&live, &target);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], ChangeOperation::AddTable { .. }));
    }

    #[test]
    fn convergence_after_projection() {
        // Applying the diff to the live tables, then re-diffing, yields [].
        let mut live = items_snapshot();
        live.tables
            .get_mut("items")
            .unwrap()
            .columns
            .push(column("legacy_flag", ColumnType::Boolean, true));
        let mut target = items_snapshot();
        target
            .tables
            .get_mut("items")
            .unwrap()
            .columns
            .push(column("stock", ColumnType::Integer, true));

        let ops = diff(&live, &target);
        let mut projected = live.clone();
        for op in &ops {
            match op {
                ChangeOperation::AddTable { table } => {
                    projected.tables.insert(table.name.clone(), table.clone());
                }
                ChangeOperation::DropTable { table } => {
                    projected.tables.remove(&table.name);
                }
                other => {
                    let name = other.table_name().to_string();
                    let updated = other.apply_to_table(projected.table(&name).unwrap());
                    projected.tables.insert(name, updated);
                }
            }
        }
        assert!(diff(&projected, &target).is_empty());
    }
}
