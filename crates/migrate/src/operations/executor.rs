//! Runs operations against a live connection

use crate::backend::{Connection, SqlValue};
use crate::error::{MigrateError, MigrateResult};

use super::{sql, Operation, OperationKind};

/// Dispatches each operation kind to the statements it needs. Everything,
/// including model introspection for callbacks, runs on the connection it
/// is handed.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperationExecutor;

impl OperationExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute one operation. Any failure is wrapped as
    /// [`MigrateError::Operation`] and leaves rollback to the caller.
    pub async fn execute(&self, op: &Operation, conn: &mut dyn Connection) -> MigrateResult<()> {
        tracing::debug!(operation = %op.describe(), atomic = op.atomic, "Executing operation");
        self.dispatch(op, conn)
            .await
            .map_err(|e| MigrateError::operation(op.describe(), e))
    }

    async fn dispatch(&self, op: &Operation, conn: &mut dyn Connection) -> MigrateResult<()> {
        match &op.kind {
            OperationKind::RawSql { sql, params } => {
                conn.execute(sql, params).await?;
            }
            OperationKind::Callback {
                callback,
                inject_models,
            } => {
                if *inject_models {
                    let models = conn.introspect(None).await?;
                    callback.run(conn, Some(&models)).await?;
                } else {
                    callback.run(conn, None).await?;
                }
            }
            OperationKind::CreateTables(tables) => {
                for table in tables {
                    conn.execute(&sql::create_table(table)?, &[]).await?;
                }
            }
            OperationKind::DropTables(tables) => {
                for table in tables {
                    conn.execute(&sql::drop_table(table), &[]).await?;
                }
            }
            OperationKind::RenameTable { old, new } => {
                let name = [SqlValue::Text(old.clone())];
                let constraints = conn.fetch_strings(sql::TABLE_CONSTRAINTS_SQL, &name).await?;
                let indexes = conn.fetch_strings(sql::TABLE_INDEXES_SQL, &name).await?;
                for query in sql::rename_table(old, new, &constraints, &indexes)? {
                    conn.execute(&query, &[]).await?;
                }
            }
            OperationKind::AddPrimaryKey { table, columns } => {
                conn.execute(&sql::add_primary_key(table, columns)?, &[]).await?;
            }
            OperationKind::AddColumn { table, column } => {
                conn.execute(&sql::add_column(table, column), &[]).await?;
            }
            OperationKind::DropColumn { table, column } => {
                conn.execute(&sql::drop_column(table, column), &[]).await?;
            }
            OperationKind::RenameColumn { table, old, new } => {
                conn.execute(&sql::rename_column(table, old, new), &[]).await?;
            }
            OperationKind::AddIndex {
                table,
                columns,
                unique,
                name,
            } => {
                let statement = sql::add_index(table, columns, *unique, name.as_deref())?;
                conn.execute(&statement, &[]).await?;
            }
            OperationKind::DropIndex { name } => {
                conn.execute(&sql::drop_index(name), &[]).await?;
            }
        }
        Ok(())
    }
}
