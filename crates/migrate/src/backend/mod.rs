//! Database backend abstraction
//!
//! The resolver, ledger and operation executor only talk to the database
//! through these traits. `postgres` provides the sqlx implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{MigrateError, MigrateResult};
use crate::models::SchemaSnapshot;

pub mod postgres;

pub use postgres::PostgresBackend;

/// A bind parameter or a decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

/// One result row, columns in select order
pub type SqlRow = Vec<SqlValue>;

/// Anything statements can be executed against: an autocommit connection
/// or an open transaction
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64>;

    /// Execute a query and return all rows
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>>;

    /// Snapshot the schema as seen by this connection, including DDL run
    /// earlier on the same transaction
    async fn introspect(&mut self, tables: Option<&[String]>) -> MigrateResult<SchemaSnapshot>;

    /// Execute a query and return the first column of every row as text
    async fn fetch_strings(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<String>> {
        let rows = self.fetch_all(sql, params).await?;
        rows.into_iter()
            .map(|row| match row.into_iter().next() {
                Some(SqlValue::Text(value)) => Ok(value),
                other => Err(MigrateError::Database(format!(
                    "Expected a text column, got {:?}",
                    other
                ))),
            })
            .collect()
    }
}

/// An open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait Transaction: Connection {
    fn as_connection(&mut self) -> &mut dyn Connection;

    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// Database capability used by a migration run
#[async_trait]
pub trait Backend: Send + Sync {
    /// Begin a new transaction on a pooled connection
    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>>;

    /// Check out an autocommit connection
    async fn acquire(&self) -> MigrateResult<Box<dyn Connection>>;

    /// Whether DDL statements take part in transactions on this backend
    fn supports_transactional_ddl(&self) -> bool;

    /// Snapshot the committed schema on a fresh connection, optionally
    /// limited to the named tables
    async fn introspect(&self, tables: Option<&[String]>) -> MigrateResult<SchemaSnapshot> {
        let mut conn = self.acquire().await?;
        conn.introspect(tables).await
    }

    /// Release pooled resources
    async fn close(&self) {}
}
