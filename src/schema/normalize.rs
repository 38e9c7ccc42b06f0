//! Dialect type-spelling canonicalization.
//!
//! Catalogs report the same logical type under many spellings ("character
//! varying", "varchar", "int4", ...). Both snapshot sides funnel through this
//! module so the differ only ever compares canonical [`ColumnType`]s:
//! the live side via [`parse_type`], the declared side via [`storage_type`],
//! which maps a declared type to what the dialect will actually store it as
//! (e.g. `Uuid` becomes `VARCHAR(36)` on MySQL).

use crate::database::DatabaseType;
use crate::schema::ColumnType;

/// Parse a catalog-reported type string into a canonical type.
///
/// `raw` carries the length/precision suffix when the catalog provides one
/// ("character varying(120)", "decimal(10,2)"). Wrapped custom types should
/// be unwrapped before calling: Postgres domains already surface their
/// underlying type in `information_schema.columns.data_type`, and enum
/// columns are passed as their `udt_name`, which lands in `Custom`.
pub fn parse_type(dialect: DatabaseType, raw: &str) -> ColumnType {
    let lowered = raw.trim().to_lowercase();
    let (base, args) = split_type_args(&lowered);

    match base {
        "character varying" | "varchar" | "nvarchar" | "varchar2" => match first_arg(&args) {
            Some(n) => ColumnType::Varchar(n),
            None => ColumnType::Text,
        },
        "character" | "char" | "bpchar" => match first_arg(&args) {
            // Uuid is stored as CHAR(36) on MySQL; fixed-length strings have
            // no canonical slot of their own
            Some(n) => ColumnType::Varchar(n),
            None => ColumnType::Varchar(1),
        },
        "text" | "clob" | "mediumtext" | "longtext" | "tinytext" => ColumnType::Text,
        "smallint" | "int2" => ColumnType::SmallInt,
        "integer" | "int" | "int4" | "mediumint" => ColumnType::Integer,
        "bigint" | "int8" => ColumnType::BigInt,
        "tinyint" => {
            // MySQL convention: TINYINT(1) is a boolean
            if first_arg(&args) == Some(1) {
                ColumnType::Boolean
            } else {
                ColumnType::SmallInt
            }
        }
        "boolean" | "bool" => ColumnType::Boolean,
        "real" | "float4" => ColumnType::Float,
        "float" => {
            if dialect == DatabaseType::MySql {
                ColumnType::Float
            } else {
                ColumnType::Double
            }
        }
        "double precision" | "double" | "float8" => ColumnType::Double,
        "numeric" | "decimal" => match (first_arg(&args), second_arg(&args)) {
            (Some(p), Some(s)) => ColumnType::Decimal(p as u8, s as u8),
            (Some(p), None) => ColumnType::Decimal(p as u8, 0),
            _ => ColumnType::Decimal(0, 0),
        },
        "date" => ColumnType::Date,
        "time" | "time without time zone" => ColumnType::Time,
        "timestamp" | "timestamp without time zone" | "datetime" => ColumnType::Timestamp,
        "timestamptz" | "timestamp with time zone" => ColumnType::TimestampTz,
        "json" | "jsonb" => ColumnType::Json,
        "uuid" => ColumnType::Uuid,
        "bytea" | "blob" | "longblob" | "mediumblob" | "tinyblob" | "varbinary" | "binary" => {
            ColumnType::Blob
        }
        other => ColumnType::Custom(other.to_string()),
    }
}

/// Map a declared type to the canonical form of what the dialect stores.
///
/// Comparing `storage_type(d, declared)` against `parse_type(d, live)` is
/// what keeps a declared `Uuid` column on MySQL (stored as CHAR(36)) from
/// reporting perpetual drift.
pub fn storage_type(dialect: DatabaseType, declared: &ColumnType) -> ColumnType {
    use ColumnType::*;
    match dialect {
        DatabaseType::Postgres => declared.clone(),
        DatabaseType::MySql => match declared {
            Uuid => Varchar(36),
            TimestampTz => Timestamp,
            other => other.clone(),
        },
        // SQLite collapses everything into its five storage classes
        DatabaseType::Sqlite => match declared {
            Boolean | SmallInt | Integer | BigInt => BigInt,
            Float | Double => Double,
            Decimal(_, _) => Decimal(0, 0),
            Varchar(_) | Text | Date | Time | Timestamp | TimestampTz | Json | Uuid => Text,
            Blob => Blob,
            Custom(name) => Custom(name.clone()),
        },
    }
}

fn split_type_args(lowered: &str) -> (&str, Vec<u32>) {
    match lowered.find('(') {
        Some(open) => {
            let base = lowered[..open].trim();
            let args = lowered[open + 1..]
                .trim_end_matches(')')
                .split(',')
                .filter_map(|part| part.trim().parse::<u32>().ok())
                .collect();
            (base, args)
        }
        None => (lowered, Vec::new()),
    }
}

fn first_arg(args: &[u32]) -> Option<u32> {
    args.first().copied()
}

fn second_arg(args: &[u32]) -> Option<u32> {
    args.get(1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_spellings_converge() {
        let dialect = DatabaseType::Postgres;
        assert_eq!(
            parse_type(dialect, "character varying(120)"),
            ColumnType::Varchar(120)
        );
        assert_eq!(parse_type(dialect, "varchar(120)"), ColumnType::Varchar(120));
        assert_eq!(parse_type(dialect, "int4"), ColumnType::Integer);
        assert_eq!(parse_type(dialect, "int8"), ColumnType::BigInt);
        assert_eq!(
            parse_type(dialect, "timestamp with time zone"),
            ColumnType::TimestampTz
        );
        assert_eq!(parse_type(dialect, "double precision"), ColumnType::Double);
        assert_eq!(parse_type(dialect, "numeric(10,2)"), ColumnType::Decimal(10, 2));
        assert_eq!(parse_type(dialect, "jsonb"), ColumnType::Json);
    }

    #[test]
    fn mysql_tinyint1_is_boolean() {
        assert_eq!(
            parse_type(DatabaseType::MySql, "tinyint(1)"),
            ColumnType::Boolean
        );
        assert_eq!(
            parse_type(DatabaseType::MySql, "tinyint(4)"),
            ColumnType::SmallInt
        );
    }

    #[test]
    fn unknown_types_pass_through() {
        assert_eq!(
            parse_type(DatabaseType::Postgres, "tsvector"),
            ColumnType::Custom("tsvector".to_string())
        );
    }

    #[test]
    fn mysql_storage_of_uuid_matches_live_char36() {
        let stored = storage_type(DatabaseType::MySql, &ColumnType::Uuid);
        let live = parse_type(DatabaseType::MySql, "char(36)");
        assert_eq!(stored, live);
    }

    #[test]
    fn sqlite_storage_classes_are_stable() {
        let dialect = DatabaseType::Sqlite;
        assert_eq!(storage_type(dialect, &ColumnType::Varchar(80)), ColumnType::Text);
        assert_eq!(storage_type(dialect, &ColumnType::Integer), ColumnType::BigInt);
        assert_eq!(storage_type(dialect, &ColumnType::Boolean), ColumnType::BigInt);
        // Round trip: what the DDL generator writes parses back to the same class
        assert_eq!(parse_type(dialect, "TEXT"), ColumnType::Text);
        assert_eq!(parse_type(dialect, "INTEGER"), ColumnType::Integer);
        assert_eq!(
            storage_type(dialect, &parse_type(dialect, "INTEGER")),
            ColumnType::BigInt
        );
    }
}
