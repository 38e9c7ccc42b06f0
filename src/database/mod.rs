use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("query error: {0}")]
    Query(String),

    /// Transaction error
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL database
    Postgres,
    /// MySQL database
    MySql,
    /// SQLite database
    Sqlite,
}

impl Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::Postgres => write!(f, "postgres"),
            DatabaseType::MySql => write!(f, "mysql"),
            DatabaseType::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Database configuration for establishing connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Type of database to connect to
    pub db_type: DatabaseType,

    /// Database host (for Postgres/MySQL)
    #[serde(default)]
    pub host: Option<String>,

    /// Database port (for Postgres/MySQL)
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name (for Postgres/MySQL) or file path (for SQLite)
    pub database: String,

    /// Database username (for Postgres/MySQL)
    #[serde(default)]
    pub username: Option<String>,

    /// Database password (for Postgres/MySQL)
    #[serde(default)]
    pub password: Option<String>,

    /// Connection pool settings
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        // Default to SQLite in-memory database
        Self {
            db_type: DatabaseType::Sqlite,
            host: None,
            port: None,
            database: ":memory:".to_string(),
            username: None,
            password: None,
            pool: PoolConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Stable identity for this target database, independent of credentials.
    ///
    /// Used as the schema-lock key and as the scope of migration state, so
    /// two processes pointed at the same database derive the same identity.
    pub fn identity(&self) -> String {
        match self.db_type {
            DatabaseType::Sqlite => format!("sqlite:{}", self.database),
            _ => format!(
                "{}://{}:{}/{}",
                self.db_type,
                self.host.as_deref().unwrap_or("localhost"),
                self.port.unwrap_or_else(|| default_port(self.db_type)),
                self.database
            ),
        }
    }
}

fn default_port(db_type: DatabaseType) -> u16 {
    match db_type {
        DatabaseType::Postgres => 5432,
        DatabaseType::MySql => 3306,
        DatabaseType::Sqlite => 0,
    }
}

/// Configuration for connection pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquisition timeout
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_acquire_timeout() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
        }
    }
}

/// Represents a row from a database query
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name
    fn get_string(&self, column: &str) -> DatabaseResult<String>;
    fn get_i64(&self, column: &str) -> DatabaseResult<i64>;
    fn get_bool(&self, column: &str) -> DatabaseResult<bool>;

    /// Try to get a column value by name, returning None if the column
    /// doesn't exist or is NULL
    fn try_get_string(&self, column: &str) -> DatabaseResult<Option<String>>;
    fn try_get_i64(&self, column: &str) -> DatabaseResult<Option<i64>>;
}

/// Core database connection interface
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a query that returns no rows
    async fn execute(&self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a query that returns rows
    async fn query(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query that returns a single row
    async fn query_one(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>>;

    /// Get the underlying database type
    fn get_database_type(&self) -> DatabaseType;

    /// Stable identity of the target database (see [`DatabaseConfig::identity`])
    fn connection_identity(&self) -> String;

    /// Check if the connection is alive
    async fn ping(&self) -> DatabaseResult<()>;

    /// Close the connection
    async fn close(&self) -> DatabaseResult<()>;
}

/// Database transaction interface
#[async_trait]
pub trait DatabaseTransaction: Send + Sync {
    /// Execute a query within the transaction that returns no rows
    async fn execute(&mut self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a query within the transaction that returns rows
    async fn query(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DatabaseResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> DatabaseResult<()>;
}

/// Represents a parameter value for database queries
#[derive(Debug, Clone)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
}

/// Create a connection for the configured database type.
pub async fn create_database_connection(
    config: &DatabaseConfig,
) -> DatabaseResult<Box<dyn DatabaseConnection>> {
    let connection = match config.db_type {
        DatabaseType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let conn = postgres::PostgresConnection::connect(config).await?;
                Box::new(conn) as Box<dyn DatabaseConnection>
            }
            #[cfg(not(feature = "postgres"))]
            {
                return Err(DatabaseError::Configuration(
                    "PostgreSQL support is not enabled. Enable the 'postgres' feature.".to_string(),
                ));
            }
        }
        DatabaseType::MySql => {
            #[cfg(feature = "mysql")]
            {
                let conn = mysql::MySqlConnection::connect(config).await?;
                Box::new(conn) as Box<dyn DatabaseConnection>
            }
            #[cfg(not(feature = "mysql"))]
            {
                return Err(DatabaseError::Configuration(
                    "MySQL support is not enabled. Enable the 'mysql' feature.".to_string(),
                ));
            }
        }
        DatabaseType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let conn = sqlite::SqliteConnection::connect(config).await?;
                Box::new(conn) as Box<dyn DatabaseConnection>
            }
            #[cfg(not(feature = "sqlite"))]
            {
                return Err(DatabaseError::Configuration(
                    "SQLite support is not enabled. Enable the 'sqlite' feature.".to_string(),
                ));
            }
        }
    };

    Ok(connection)
}

// Implementation modules for specific database types
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnection;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "mysql")]
pub use mysql::MySqlConnection;

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnection;
