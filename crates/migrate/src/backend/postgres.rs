//! PostgreSQL Backend Implementation
//!
//! sqlx-backed implementation of the backend traits. The pool is created
//! once per process and passed to the runner explicitly.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};

use super::{Backend, Connection, SqlRow, SqlValue, Transaction};
use crate::config::{DatabaseConfig, PoolConfig};
use crate::error::{MigrateError, MigrateResult};
use crate::models::{ColumnDescriptor, SchemaSnapshot, TableDescriptor};

/// `format_type` keeps lengths and array/domain types usable in DDL
const COLUMNS_SQL: &str = "SELECT c.relname::text, a.attname::text, \
    format_type(a.atttypid, a.atttypmod), \
    CASE WHEN a.attnotnull THEN 'NO' ELSE 'YES' END, \
    pg_get_expr(d.adbin, d.adrelid) \
    FROM pg_attribute a \
    JOIN pg_class c ON c.oid = a.attrelid \
    JOIN pg_namespace n ON n.oid = c.relnamespace \
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
    WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p') \
      AND a.attnum > 0 AND NOT a.attisdropped \
    ORDER BY c.relname, a.attnum";

const PRIMARY_KEYS_SQL: &str = "SELECT tc.table_name::text, kcu.column_name::text \
    FROM information_schema.table_constraints tc \
    JOIN information_schema.key_column_usage kcu \
      ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
    WHERE tc.table_schema = 'public' AND tc.constraint_type = 'PRIMARY KEY' \
    ORDER BY tc.table_name, kcu.ordinal_position";

/// PostgreSQL database handle
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the connection pool and verify it can connect
    pub async fn connect(config: &DatabaseConfig, pool_config: &PoolConfig) -> MigrateResult<Self> {
        config.validate()?;

        let mut options = PgPoolOptions::new()
            .max_connections(pool_config.max_connections)
            .min_connections(pool_config.min_connections)
            .acquire_timeout(pool_config.acquire_timeout);
        if let Some(idle_timeout) = pool_config.idle_timeout {
            options = options.idle_timeout(idle_timeout);
        }

        let pool = options
            .connect_with(config.connect_options())
            .await
            .map_err(|e| {
                MigrateError::Connection(format!(
                    "Failed to connect to {}: {}",
                    config.display_url(),
                    e
                ))
            })?;

        tracing::debug!(
            url = %config.display_url(),
            max_connections = pool_config.max_connections,
            "Database pool created"
        );
        Ok(Self::new(pool))
    }

    /// Connect from a `postgres://` URL
    pub async fn connect_url(url: &str, pool_config: &PoolConfig) -> MigrateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_config.max_connections)
            .acquire_timeout(pool_config.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| MigrateError::Connection(format!("Failed to connect to database: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrateError::Transaction(format!("Failed to start transaction: {}", e)))?;
        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }

    async fn acquire(&self) -> MigrateResult<Box<dyn Connection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrateError::Connection(format!("Failed to acquire connection: {}", e)))?;
        Ok(Box::new(PgPooledConnection { conn }))
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Read columns and primary keys through `conn`, so an open transaction
/// sees its own DDL
async fn introspect_on(
    conn: &mut dyn Connection,
    tables: Option<&[String]>,
) -> MigrateResult<SchemaSnapshot> {
    let columns = conn
        .fetch_all(COLUMNS_SQL, &[])
        .await
        .map_err(|e| MigrateError::Introspection(e.to_string()))?;
    let keys = conn
        .fetch_all(PRIMARY_KEYS_SQL, &[])
        .await
        .map_err(|e| MigrateError::Introspection(e.to_string()))?;

    build_snapshot(columns, keys, tables)
}

/// Assemble introspection rows into a snapshot. Column rows are
/// `(table, column, type, is_nullable, default)`, key rows `(table, column)`.
fn build_snapshot(
    columns: Vec<SqlRow>,
    keys: Vec<SqlRow>,
    only: Option<&[String]>,
) -> MigrateResult<SchemaSnapshot> {
    let wanted = |table: &str| only.map_or(true, |names| names.iter().any(|n| n == table));
    let mut snapshot = SchemaSnapshot::default();

    for row in columns {
        let text = |i: usize| row.get(i).and_then(SqlValue::as_str).map(str::to_string);
        let (Some(table), Some(name), Some(data_type)) = (text(0), text(1), text(2)) else {
            return Err(MigrateError::Introspection(format!(
                "Malformed column row: {:?}",
                row
            )));
        };
        if !wanted(&table) {
            continue;
        }
        let column = ColumnDescriptor {
            name,
            data_type,
            nullable: text(3).as_deref() == Some("YES"),
            default: text(4),
        };
        snapshot
            .tables
            .entry(table.clone())
            .or_insert_with(|| TableDescriptor::new(table))
            .columns
            .push(column);
    }

    for row in keys {
        if let (Some(SqlValue::Text(table)), Some(SqlValue::Text(column))) = (row.first(), row.get(1)) {
            if let Some(descriptor) = snapshot.tables.get_mut(table) {
                descriptor.primary_key.push(column.clone());
            }
        }
    }

    Ok(snapshot)
}

/// Autocommit connection checked out of the pool
pub struct PgPooledConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
}

#[async_trait]
impl Connection for PgPooledConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        let result = if params.is_empty() {
            sqlx::Executor::execute(&mut *self.conn, sql).await?
        } else {
            bind_all(sqlx::query(sql), params).execute(&mut *self.conn).await?
        };
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&mut *self.conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn introspect(&mut self, tables: Option<&[String]>) -> MigrateResult<SchemaSnapshot> {
        introspect_on(self, tables).await
    }
}

/// Transaction on a pooled connection
pub struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn inner(&mut self) -> MigrateResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrateError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl Connection for PgTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        let tx = self.inner()?;
        // without parameters use the simple protocol, which allows several
        // statements in one string
        let result = if params.is_empty() {
            sqlx::Executor::execute(&mut **tx, sql).await?
        } else {
            bind_all(sqlx::query(sql), params).execute(&mut **tx).await?
        };
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
        let tx = self.inner()?;
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&mut **tx).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn introspect(&mut self, tables: Option<&[String]>) -> MigrateResult<SchemaSnapshot> {
        introspect_on(self, tables).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    fn as_connection(&mut self) -> &mut dyn Connection {
        self
    }

    async fn commit(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::Transaction("Transaction already completed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| MigrateError::Transaction(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::Transaction("Transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| MigrateError::Transaction(format!("Failed to rollback transaction: {}", e)))
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> MigrateResult<SqlRow> {
    (0..row.len()).map(|index| decode_value(row, index)).collect()
}

fn decode_value(row: &PgRow, index: usize) -> MigrateResult<SqlValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => SqlValue::Bool(row.try_get(index)?),
        "INT2" => SqlValue::Int(row.try_get::<i16, _>(index)?.into()),
        "INT4" => SqlValue::Int(row.try_get::<i32, _>(index)?.into()),
        "INT8" => SqlValue::Int(row.try_get(index)?),
        "TIMESTAMPTZ" => SqlValue::Timestamp(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            SqlValue::Timestamp(naive.and_utc())
        }
        _ => SqlValue::Text(row.try_get(index).map_err(|e| {
            MigrateError::Database(format!(
                "Failed to decode column {} of type {}: {}",
                index, type_name, e
            ))
        })?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    fn column_rows() -> Vec<SqlRow> {
        vec![
            vec![text("Users"), text("id"), text("integer"), text("NO"), text("nextval('\"Users_seq_seq\"'::regclass)")],
            vec![text("Users"), text("email"), text("character varying(20)"), text("YES"), SqlValue::Null],
            vec![text("Orders"), text("id"), text("integer"), text("NO"), SqlValue::Null],
            vec![text("Orders"), text("tags"), text("integer[]"), text("YES"), SqlValue::Null],
        ]
    }

    #[test]
    fn test_build_snapshot_groups_columns_and_keys() {
        let keys = vec![vec![text("Users"), text("id")]];
        let snapshot = build_snapshot(column_rows(), keys, None).unwrap();

        assert_eq!(snapshot.len(), 2);
        let users = snapshot.get("Users").unwrap();
        assert_eq!(users.columns.len(), 2);
        assert_eq!(users.primary_key, vec!["id".to_string()]);
        assert!(users.get_column("email").unwrap().nullable);
        assert!(!users.get_column("id").unwrap().nullable);
        assert!(users.get_column("id").unwrap().default.is_some());
        assert!(snapshot.get("Orders").unwrap().primary_key.is_empty());
    }

    #[test]
    fn test_introspected_types_render_back_into_ddl() {
        let snapshot = build_snapshot(column_rows(), Vec::new(), None).unwrap();
        let mut orders = snapshot.get("Orders").unwrap().clone();
        orders.name = "OrdersCopy".to_string();
        orders.columns.push(snapshot.get("Users").unwrap().get_column("email").unwrap().clone());

        let ddl = crate::operations::sql::create_table(&orders).unwrap();
        assert!(ddl.contains("\"tags\" integer[]"));
        assert!(ddl.contains("\"email\" character varying(20)"));
    }

    #[test]
    fn test_build_snapshot_filters_tables() {
        let only = vec!["Orders".to_string()];
        let snapshot = build_snapshot(column_rows(), Vec::new(), Some(&only)).unwrap();
        assert_eq!(snapshot.table_names().collect::<Vec<_>>(), vec!["Orders"]);
    }

    #[test]
    fn test_build_snapshot_rejects_malformed_rows() {
        let rows = vec![vec![text("Users"), SqlValue::Null, text("integer")]];
        assert!(matches!(
            build_snapshot(rows, Vec::new(), None),
            Err(MigrateError::Introspection(_))
        ));
    }
}
