use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, model_definition_error};

pub mod normalize;

/// Canonical column types, independent of dialect spellings.
///
/// Live introspection parses whatever the catalog reports into this enum
/// (see [`normalize`]); declared models use it directly. Comparing two
/// snapshots therefore never sees "character varying" vs "varchar" drift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    /// Decimal with precision and scale
    Decimal(u8, u8),
    /// Variable-length string with maximum length
    Varchar(u32),
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Uuid,
    Blob,
    /// Dialect-specific type we pass through verbatim
    Custom(String),
}

impl ColumnType {
    /// Whether a value of `self` always fits into `target` without loss.
    ///
    /// Anything that changes the type and is not listed here counts as
    /// narrowing or incompatible.
    pub fn widens_to(&self, target: &ColumnType) -> bool {
        use ColumnType::*;
        match (self, target) {
            (a, b) if a == b => true,
            (SmallInt, Integer) | (SmallInt, BigInt) | (Integer, BigInt) => true,
            (Float, Double) => true,
            (Varchar(n), Varchar(m)) => m >= n,
            (Varchar(_), Text) => true,
            (Decimal(p1, s1), Decimal(p2, s2)) => p2 >= p1 && s2 >= s1,
            (Timestamp, TimestampTz) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ColumnType::*;
        match self {
            Boolean => write!(f, "BOOLEAN"),
            SmallInt => write!(f, "SMALLINT"),
            Integer => write!(f, "INTEGER"),
            BigInt => write!(f, "BIGINT"),
            Float => write!(f, "FLOAT"),
            Double => write!(f, "DOUBLE"),
            Decimal(p, s) => write!(f, "DECIMAL({}, {})", p, s),
            Varchar(n) => write!(f, "VARCHAR({})", n),
            Text => write!(f, "TEXT"),
            Date => write!(f, "DATE"),
            Time => write!(f, "TIME"),
            Timestamp => write!(f, "TIMESTAMP"),
            TimestampTz => write!(f, "TIMESTAMPTZ"),
            Json => write!(f, "JSON"),
            Uuid => write!(f, "UUID"),
            Blob => write!(f, "BLOB"),
            Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Column definition for a database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Column data type
    pub column_type: ColumnType,
    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Default value expression, as SQL text
    #[serde(default)]
    pub default_value: Option<String>,
    /// Whether the column has a single-column unique constraint
    #[serde(default)]
    pub unique: bool,
    /// Whether the column is (part of) the primary key
    #[serde(default)]
    pub primary_key: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ColumnDef {
    fn default() -> Self {
        ColumnDef {
            name: String::new(),
            column_type: ColumnType::Text,
            nullable: default_true(),
            default_value: None,
            unique: false,
            primary_key: false,
        }
    }
}

/// Index definition for a database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IndexDef {
    /// Optional index name (auto-generated if None)
    #[serde(default)]
    pub name: Option<String>,
    /// Columns included in the index
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness (default: false)
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Name used in DDL and for identity during diffing.
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}_idx", table, self.columns.join("_")),
        }
    }
}

/// Complete table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Column definitions, in declaration order
    pub columns: Vec<ColumnDef>,
    /// Composite primary key (overrides primary_key on columns)
    #[serde(default)]
    pub primary_key: Option<Vec<String>>,
    /// Table indexes
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns, whether declared per-column or table-level.
    pub fn primary_key_columns(&self) -> Vec<String> {
        if let Some(pk) = &self.primary_key {
            return pk.clone();
        }
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Canonical, dialect-normalized description of a schema at a point in time.
///
/// Built fresh each detection cycle and never mutated in place; tables are
/// keyed by name with deterministic iteration order so two equal snapshots
/// hash identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableDef>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: impl IntoIterator<Item = TableDef>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Content hash of the snapshot. BTreeMap iteration is sorted and column
    /// order is declaration order, so serialization is canonical.
    pub fn content_hash(&self) -> String {
        let serialized = serde_json::to_vec(&self.tables).unwrap_or_default();
        let digest = Sha256::digest(&serialized);
        format!("{:x}", digest)
    }
}

/// The declared data-model collection consumed by the CRUD layer.
///
/// Loadable from a YAML or JSON model file (CLI) or assembled
/// programmatically by embedding applications.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRegistry {
    pub tables: Vec<TableDef>,
}

impl ModelRegistry {
    pub fn new(tables: Vec<TableDef>) -> Self {
        Self { tables }
    }

    /// Parse a model file, accepting YAML or JSON.
    pub fn from_str(content: &str) -> Result<Self> {
        let registry: ModelRegistry = serde_yaml::from_str(content)
            .or_else(|_| serde_json::from_str(content))
            .map_err(|e| model_definition_error(format!("cannot parse model file: {}", e)))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Reject models the generators cannot express before any diffing runs.
    pub fn validate(&self) -> Result<()> {
        let mut seen_tables = std::collections::HashSet::new();
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(model_definition_error("table with empty name"));
            }
            if !seen_tables.insert(table.name.as_str()) {
                return Err(model_definition_error(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
            if table.columns.is_empty() {
                return Err(model_definition_error(format!(
                    "table '{}' has no columns",
                    table.name
                )));
            }
            let mut seen_columns = std::collections::HashSet::new();
            for column in &table.columns {
                if !seen_columns.insert(column.name.as_str()) {
                    return Err(model_definition_error(format!(
                        "duplicate column '{}.{}'",
                        table.name, column.name
                    )));
                }
                if column.primary_key && column.nullable {
                    return Err(model_definition_error(format!(
                        "primary key column '{}.{}' cannot be nullable",
                        table.name, column.name
                    )));
                }
                if let ColumnType::Varchar(0) = column.column_type {
                    return Err(model_definition_error(format!(
                        "column '{}.{}' has zero-length VARCHAR",
                        table.name, column.name
                    )));
                }
            }
            for index in &table.indexes {
                for col in &index.columns {
                    if table.column(col).is_none() {
                        return Err(model_definition_error(format!(
                            "index on '{}' references unknown column '{}'",
                            table.name, col
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
