//! Risk classification for change operations.
//!
//! Rules are independent functions evaluated over each operation; a rule
//! that panics is logged and skipped so one broken rule cannot block every
//! migration. Plan risk is the maximum over its operations.

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::warn;

use crate::ddl::DialectCapabilities;
use crate::diff::ChangeOperation;

/// Totally ordered risk classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Safe,
    Moderate,
    Destructive,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "safe"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::Destructive => write!(f, "destructive"),
        }
    }
}

impl RiskLevel {
    pub fn parse(value: &str) -> Option<RiskLevel> {
        match value {
            "safe" => Some(RiskLevel::Safe),
            "moderate" => Some(RiskLevel::Moderate),
            "destructive" => Some(RiskLevel::Destructive),
            _ => None,
        }
    }
}

type Rule = fn(&ChangeOperation, &DialectCapabilities) -> Option<RiskLevel>;

/// Ordered rule set. Each rule votes on the operations it recognizes; the
/// final classification is the highest vote.
const RULES: &[(&str, Rule)] = &[
    ("additive_structures", rule_additive_structures),
    ("add_column", rule_add_column),
    ("alter_nullable", rule_alter_nullable),
    ("alter_column_type", rule_alter_column_type),
    ("destructive_drops", rule_destructive_drops),
    ("drop_index", rule_drop_index),
];

fn rule_additive_structures(
    op: &ChangeOperation,
    _caps: &DialectCapabilities,
) -> Option<RiskLevel> {
    match op {
        ChangeOperation::AddTable { .. } | ChangeOperation::AddIndex { .. } => {
            Some(RiskLevel::Safe)
        }
        _ => None,
    }
}

fn rule_add_column(op: &ChangeOperation, _caps: &DialectCapabilities) -> Option<RiskLevel> {
    match op {
        ChangeOperation::AddColumn { column, .. } => {
            if column.nullable || column.default_value.is_some() {
                Some(RiskLevel::Safe)
            } else {
                // NOT NULL with no default fails on any non-empty table
                Some(RiskLevel::Moderate)
            }
        }
        _ => None,
    }
}

fn rule_alter_nullable(op: &ChangeOperation, _caps: &DialectCapabilities) -> Option<RiskLevel> {
    match op {
        ChangeOperation::AlterNullable { to, .. } => {
            if *to {
                Some(RiskLevel::Safe)
            } else {
                // Tightening can fail on existing NULLs
                Some(RiskLevel::Moderate)
            }
        }
        _ => None,
    }
}

fn rule_alter_column_type(op: &ChangeOperation, _caps: &DialectCapabilities) -> Option<RiskLevel> {
    match op {
        ChangeOperation::AlterColumnType { from, to, .. } => {
            if from.widens_to(to) {
                Some(RiskLevel::Moderate)
            } else {
                Some(RiskLevel::Destructive)
            }
        }
        _ => None,
    }
}

fn rule_destructive_drops(op: &ChangeOperation, _caps: &DialectCapabilities) -> Option<RiskLevel> {
    match op {
        ChangeOperation::DropTable { .. } | ChangeOperation::DropColumn { .. } => {
            Some(RiskLevel::Destructive)
        }
        _ => None,
    }
}

fn rule_drop_index(op: &ChangeOperation, _caps: &DialectCapabilities) -> Option<RiskLevel> {
    match op {
        // No data loss, but losing a unique index can admit duplicates
        ChangeOperation::DropIndex { .. } => Some(RiskLevel::Moderate),
        _ => None,
    }
}

/// Classify a single operation.
///
/// Falls back to `Moderate` when no rule recognized the operation: unknown
/// territory is worth a look but must not block every migration the way a
/// blanket `Destructive` would.
pub fn classify(op: &ChangeOperation, caps: &DialectCapabilities) -> RiskLevel {
    let mut verdict: Option<RiskLevel> = None;
    for (name, rule) in RULES {
        match catch_unwind(AssertUnwindSafe(|| rule(op, caps))) {
            Ok(Some(level)) => {
                verdict = Some(verdict.map_or(level, |v| v.max(level)));
            }
            Ok(None) => {}
            Err(_) => {
                warn!(rule = name, operation = %op.describe(), "risk rule panicked; skipping it");
            }
        }
    }
    verdict.unwrap_or(RiskLevel::Moderate)
}

/// Plan risk: the maximum over its operations. Monotonic by construction:
/// adding an operation can only raise it.
pub fn classify_plan(ops: &[ChangeOperation], caps: &DialectCapabilities) -> RiskLevel {
    ops.iter()
        .map(|op| classify(op, caps))
        .max()
        .unwrap_or(RiskLevel::Safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseType;
    use crate::ddl::capabilities;
    use crate::schema::{ColumnDef, ColumnType, TableDef};

    fn caps() -> &'static DialectCapabilities {
        capabilities(DatabaseType::Postgres)
    }

    fn add_column(nullable: bool, default_value: Option<&str>) -> ChangeOperation {
        ChangeOperation::AddColumn {
            table: "items".to_string(),
            column: ColumnDef {
                name: "stock".to_string(),
                column_type: ColumnType::Integer,
                nullable,
                default_value: default_value.map(|s| s.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn ordering_is_total() {
        assert!(RiskLevel::Safe < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::Destructive);
    }

    #[test]
    fn additive_operations_are_safe() {
        let op = ChangeOperation::AddTable {
            table: TableDef {
                name: "fresh".to_string(),
                ..Default::default()
            },
        };
        assert_eq!(classify(&op, caps()), RiskLevel::Safe);
        assert_eq!(classify(&add_column(false, Some("0")), caps()), RiskLevel::Safe);
        assert_eq!(classify(&add_column(true, None), caps()), RiskLevel::Safe);
    }

    #[test]
    fn required_column_without_default_is_moderate() {
        assert_eq!(classify(&add_column(false, None), caps()), RiskLevel::Moderate);
    }

    #[test]
    fn narrowing_is_destructive_widening_is_moderate() {
        let widen = ChangeOperation::AlterColumnType {
            table: "items".to_string(),
            column: "name".to_string(),
            from: ColumnType::Varchar(80),
            to: ColumnType::Varchar(255),
            nullable: false,
        };
        let narrow = ChangeOperation::AlterColumnType {
            table: "items".to_string(),
            column: "name".to_string(),
            from: ColumnType::Varchar(255),
            to: ColumnType::Varchar(80),
            nullable: false,
        };
        assert_eq!(classify(&widen, caps()), RiskLevel::Moderate);
        assert_eq!(classify(&narrow, caps()), RiskLevel::Destructive);
    }

    #[test]
    fn drops_are_destructive() {
        let op = ChangeOperation::DropColumn {
            table: "items".to_string(),
            column: ColumnDef {
                name: "legacy_flag".to_string(),
                column_type: ColumnType::Boolean,
                ..Default::default()
            },
        };
        assert_eq!(classify(&op, caps()), RiskLevel::Destructive);
    }

    #[test]
    fn plan_risk_is_monotonic() {
        let mut ops = vec![add_column(true, None)];
        let base = classify_plan(&ops, caps());
        ops.push(ChangeOperation::DropTable {
            table: TableDef {
                name: "gone".to_string(),
                ..Default::default()
            },
        });
        let with_destructive = classify_plan(&ops, caps());
        assert!(with_destructive >= base);
        assert_eq!(with_destructive, RiskLevel::Destructive);

        // Appending more operations of any kind never lowers it
        ops.push(add_column(true, None));
        assert_eq!(classify_plan(&ops, caps()), RiskLevel::Destructive);
    }

    #[test]
    fn empty_plan_is_safe() {
        assert_eq!(classify_plan(&[], caps()), RiskLevel::Safe);
    }
}
