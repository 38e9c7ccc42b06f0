use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, Row, mysql::MySqlPoolOptions};
use std::sync::Arc;
use std::time::Duration;

use crate::database::{
    DatabaseConfig, DatabaseConnection, DatabaseError, DatabaseResult, DatabaseRow,
    DatabaseTransaction, DatabaseType, DatabaseValue,
};

/// MySQL implementation of the database connection interface
pub struct MySqlConnection {
    pool: Arc<MySqlPool>,
    identity: String,
}

impl MySqlConnection {
    /// Create a new MySQL connection from a configuration
    pub async fn connect(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let database_url = build_mysql_connection_string(config);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_seconds))
            .connect(&database_url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Ok(Self {
            pool: Arc::new(pool),
            identity: config.identity(),
        })
    }
}

/// Convert a DatabaseConfig to a MySQL connection string
fn build_mysql_connection_string(config: &DatabaseConfig) -> String {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port.unwrap_or(3306);

    let mut connection_string = "mysql://".to_string();
    if let Some(username) = &config.username {
        connection_string.push_str(username);
        if let Some(password) = &config.password {
            connection_string.push(':');
            connection_string.push_str(password);
        }
        connection_string.push('@');
    }
    connection_string.push_str(&format!("{}:{}/{}", host, port, config.database));
    connection_string
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    params: &'q [DatabaseValue],
) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(None::<String>),
            DatabaseValue::Boolean(b) => query.bind(b),
            DatabaseValue::Integer(i) => query.bind(i),
            DatabaseValue::Float(f) => query.bind(f),
            DatabaseValue::Text(s) => query.bind(s),
        };
    }
    query
}

/// MySQL implementation of the database row interface
pub struct MySqlRow {
    row: sqlx::mysql::MySqlRow,
}

impl DatabaseRow for MySqlRow {
    fn get_string(&self, column: &str) -> DatabaseResult<String> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Query(format!("Failed to get string column {}: {}", column, e))
        })
    }

    fn get_i64(&self, column: &str) -> DatabaseResult<i64> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Query(format!("Failed to get i64 column {}: {}", column, e))
        })
    }

    fn get_bool(&self, column: &str) -> DatabaseResult<bool> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Query(format!("Failed to get bool column {}: {}", column, e))
        })
    }

    fn try_get_string(&self, column: &str) -> DatabaseResult<Option<String>> {
        match self.row.try_get(column) {
            Ok(value) => Ok(value),
            Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "Failed to get string column {}: {}",
                column, e
            ))),
        }
    }

    fn try_get_i64(&self, column: &str) -> DatabaseResult<Option<i64>> {
        match self.row.try_get(column) {
            Ok(value) => Ok(value),
            Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "Failed to get i64 column {}: {}",
                column, e
            ))),
        }
    }
}

/// MySQL implementation of the database transaction interface
pub struct MySqlTransaction {
    transaction: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl DatabaseTransaction for MySqlTransaction {
    async fn execute(&mut self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let result = bind_params(sqlx::query(query), params)
            .execute(self.transaction.as_mut())
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn query(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_params(sqlx::query(query), params)
            .fetch_all(self.transaction.as_mut())
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(MySqlRow { row }) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn commit(self: Box<Self>) -> DatabaseResult<()> {
        self.transaction.commit().await.map_err(|e| {
            DatabaseError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    async fn rollback(self: Box<Self>) -> DatabaseResult<()> {
        self.transaction.rollback().await.map_err(|e| {
            DatabaseError::Transaction(format!("Failed to rollback transaction: {}", e))
        })
    }
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    async fn execute(&self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let result = bind_params(sqlx::query(query), params)
            .execute(&*self.pool)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_params(sqlx::query(query), params)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(MySqlRow { row }) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn query_one(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_params(sqlx::query(query), params)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(row.map(|r| Box::new(MySqlRow { row: r }) as Box<dyn DatabaseRow>))
    }

    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>> {
        let transaction = self.pool.begin().await.map_err(|e| {
            DatabaseError::Transaction(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(Box::new(MySqlTransaction { transaction }) as Box<dyn DatabaseTransaction>)
    }

    fn get_database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn connection_identity(&self) -> String {
        self.identity.clone()
    }

    async fn ping(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to ping database: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> DatabaseResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
