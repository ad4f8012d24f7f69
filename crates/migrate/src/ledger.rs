//! Ledger of applied migrations
//!
//! One row per successfully applied migration. Rows are only ever inserted,
//! and always on the same transaction as the migration's operations when
//! that migration runs atomically.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{Connection, SqlValue};
use crate::error::{MigrateError, MigrateResult};
use crate::operations::sql::quote_ident;

/// A persisted ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Access to the ledger table
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it is missing
    pub async fn ensure_exists(&self, conn: &mut dyn Connection) -> MigrateResult<()> {
        conn.execute(&self.create_table_sql(), &[])
            .await
            .map_err(|e| {
                MigrateError::Database(format!("Failed to create ledger table {}: {}", self.table, e))
            })?;
        Ok(())
    }

    /// Names of all applied migrations
    pub async fn load_applied(&self, conn: &mut dyn Connection) -> MigrateResult<HashSet<String>> {
        let names = conn
            .fetch_strings(&format!("SELECT name FROM {}", quote_ident(&self.table)), &[])
            .await?;
        Ok(names.into_iter().collect())
    }

    /// All ledger rows, oldest first
    pub async fn load_entries(&self, conn: &mut dyn Connection) -> MigrateResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT name, applied FROM {} ORDER BY applied, name",
            quote_ident(&self.table)
        );
        conn.fetch_all(&sql, &[])
            .await?
            .into_iter()
            .map(|row| match row.as_slice() {
                [SqlValue::Text(name), SqlValue::Timestamp(applied_at)] => Ok(LedgerEntry {
                    name: name.clone(),
                    applied_at: *applied_at,
                }),
                other => Err(MigrateError::Database(format!(
                    "Unexpected ledger row: {:?}",
                    other
                ))),
            })
            .collect()
    }

    pub async fn is_applied(&self, conn: &mut dyn Connection, name: &str) -> MigrateResult<bool> {
        let sql = format!("SELECT name FROM {} WHERE name = $1", quote_ident(&self.table));
        let rows = conn.fetch_all(&sql, &[SqlValue::Text(name.to_string())]).await?;
        Ok(!rows.is_empty())
    }

    /// Insert a ledger row. A duplicate name means an applied migration was
    /// selected again, which is reported as [`MigrateError::LedgerConflict`].
    pub async fn record(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        applied_at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} (name, applied) VALUES ($1, $2)",
            quote_ident(&self.table)
        );
        let params = [
            SqlValue::Text(name.to_string()),
            SqlValue::Timestamp(applied_at),
        ];
        match conn.execute(&sql, &params).await {
            Ok(_) => Ok(()),
            Err(MigrateError::UniqueViolation(_)) => Err(MigrateError::LedgerConflict {
                name: name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id SERIAL PRIMARY KEY,\n    \
                name VARCHAR(255) NOT NULL UNIQUE,\n    \
                applied TIMESTAMPTZ NOT NULL\n\
            )",
            quote_ident(&self.table)
        )
    }
}
