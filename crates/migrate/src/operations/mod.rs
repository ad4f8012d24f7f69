//! Operation vocabulary available to migration authors
//!
//! Migrations return a list of [`Operation`] values built through the
//! [`Migrator`]. Each operation is plain data; the [`OperationExecutor`]
//! turns it into statements against a live connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{Connection, SqlValue};
use crate::error::MigrateResult;
use crate::models::{ColumnDescriptor, SchemaSnapshot, TableDescriptor};

pub mod executor;
pub mod sql;

pub use executor::OperationExecutor;

/// Arbitrary code run as part of a migration, e.g. a data backfill
#[async_trait]
pub trait OperationCallback: Send + Sync {
    /// `models` is a fresh schema snapshot when the operation was created
    /// with `inject_models`, otherwise `None`
    async fn run(
        &self,
        conn: &mut dyn Connection,
        models: Option<&SchemaSnapshot>,
    ) -> MigrateResult<()>;
}

/// The kinds of schema change an operation can perform
#[derive(Clone)]
pub enum OperationKind {
    RawSql {
        sql: String,
        params: Vec<SqlValue>,
    },
    Callback {
        callback: Arc<dyn OperationCallback>,
        inject_models: bool,
    },
    CreateTables(Vec<TableDescriptor>),
    DropTables(Vec<String>),
    RenameTable {
        old: String,
        new: String,
    },
    AddPrimaryKey {
        table: String,
        columns: Vec<String>,
    },
    AddColumn {
        table: String,
        column: ColumnDescriptor,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        old: String,
        new: String,
    },
    AddIndex {
        table: String,
        columns: Vec<String>,
        unique: bool,
        name: Option<String>,
    },
    DropIndex {
        name: String,
    },
}

/// One executable schema change
#[derive(Clone)]
pub struct Operation {
    pub kind: OperationKind,
    /// Whether this operation wants its own transaction when the enclosing
    /// migration is not atomic
    pub atomic: bool,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self { kind, atomic: true }
    }

    /// Run without a transaction of its own, e.g. `CREATE INDEX CONCURRENTLY`
    pub fn non_atomic(mut self) -> Self {
        self.atomic = false;
        self
    }

    /// Short human-readable label used in logs and errors
    pub fn describe(&self) -> String {
        match &self.kind {
            OperationKind::RawSql { sql, .. } => {
                let sql = sql.split_whitespace().collect::<Vec<_>>().join(" ");
                if sql.chars().count() > 60 {
                    format!("raw SQL `{}...`", sql.chars().take(60).collect::<String>())
                } else {
                    format!("raw SQL `{}`", sql)
                }
            }
            OperationKind::Callback { inject_models, .. } => {
                if *inject_models {
                    "callback (with models)".to_string()
                } else {
                    "callback".to_string()
                }
            }
            OperationKind::CreateTables(tables) => format!(
                "create tables {}",
                tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
            OperationKind::DropTables(tables) => format!("drop tables {}", tables.join(", ")),
            OperationKind::RenameTable { old, new } => format!("rename table {} to {}", old, new),
            OperationKind::AddPrimaryKey { table, columns } => {
                format!("add primary key {}({})", table, columns.join(", "))
            }
            OperationKind::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.name)
            }
            OperationKind::DropColumn { table, column } => {
                format!("drop column {}.{}", table, column)
            }
            OperationKind::RenameColumn { table, old, new } => {
                format!("rename column {}.{} to {}", table, old, new)
            }
            OperationKind::AddIndex { table, columns, .. } => {
                format!("add index on {}({})", table, columns.join(", "))
            }
            OperationKind::DropIndex { name } => format!("drop index {}", name),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.describe())
            .field("atomic", &self.atomic)
            .finish()
    }
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Factory for operations, handed to every migration
#[derive(Debug, Clone, Copy, Default)]
pub struct Migrator;

impl Migrator {
    pub fn new() -> Self {
        Self
    }

    /// Execute a SQL statement verbatim
    pub fn raw(&self, sql: impl Into<String>) -> Operation {
        self.raw_with_params(sql, Vec::new())
    }

    /// Execute a SQL statement with `$n` bind parameters
    pub fn raw_with_params(&self, sql: impl Into<String>, params: Vec<SqlValue>) -> Operation {
        Operation::new(OperationKind::RawSql {
            sql: sql.into(),
            params,
        })
    }

    /// Run arbitrary code, optionally with freshly introspected models
    pub fn callback<C>(&self, callback: C, inject_models: bool) -> Operation
    where
        C: OperationCallback + 'static,
    {
        Operation::new(OperationKind::Callback {
            callback: Arc::new(callback),
            inject_models,
        })
    }

    pub fn create_model_tables(&self, tables: Vec<TableDescriptor>) -> Operation {
        Operation::new(OperationKind::CreateTables(tables))
    }

    pub fn drop_model_tables<I, S>(&self, tables: I) -> Operation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::new(OperationKind::DropTables(strings(tables)))
    }

    /// Case-sensitive rename that also carries constraints, indexes and
    /// the `seq` sequence along
    pub fn rename_table(&self, old: impl Into<String>, new: impl Into<String>) -> Operation {
        Operation::new(OperationKind::RenameTable {
            old: old.into(),
            new: new.into(),
        })
    }

    pub fn add_primary_key<I, S>(&self, table: impl Into<String>, columns: I) -> Operation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::new(OperationKind::AddPrimaryKey {
            table: table.into(),
            columns: strings(columns),
        })
    }

    pub fn add_column(&self, table: impl Into<String>, column: ColumnDescriptor) -> Operation {
        Operation::new(OperationKind::AddColumn {
            table: table.into(),
            column,
        })
    }

    pub fn drop_column(&self, table: impl Into<String>, column: impl Into<String>) -> Operation {
        Operation::new(OperationKind::DropColumn {
            table: table.into(),
            column: column.into(),
        })
    }

    pub fn rename_column(
        &self,
        table: impl Into<String>,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Operation {
        Operation::new(OperationKind::RenameColumn {
            table: table.into(),
            old: old.into(),
            new: new.into(),
        })
    }

    pub fn add_index<I, S>(&self, table: impl Into<String>, columns: I, unique: bool) -> Operation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::new(OperationKind::AddIndex {
            table: table.into(),
            columns: strings(columns),
            unique,
            name: None,
        })
    }

    /// Like [`add_index`](Self::add_index) with an explicit index name
    pub fn add_named_index<I, S>(
        &self,
        name: impl Into<String>,
        table: impl Into<String>,
        columns: I,
        unique: bool,
    ) -> Operation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::new(OperationKind::AddIndex {
            table: table.into(),
            columns: strings(columns),
            unique,
            name: Some(name.into()),
        })
    }

    pub fn drop_index(&self, name: impl Into<String>) -> Operation {
        Operation::new(OperationKind::DropIndex { name: name.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_default_to_atomic() {
        let migrator = Migrator::new();
        let op = migrator.raw("CREATE TABLE a (id int)");
        assert!(op.atomic);
        assert!(!op.non_atomic().atomic);
    }

    #[test]
    fn test_describe_truncates_long_sql() {
        let migrator = Migrator::new();
        let long = format!("UPDATE t SET v = '{}'", "x".repeat(100));
        let described = migrator.raw(long).describe();
        assert!(described.ends_with("...`"));
        assert!(described.len() < 80);

        let short = migrator.raw("SELECT\n  1").describe();
        assert_eq!(short, "raw SQL `SELECT 1`");
    }

    #[test]
    fn test_migrator_builds_expected_kinds() {
        let migrator = Migrator::new();
        assert_eq!(
            migrator.add_primary_key("Orders", ["a", "b"]).describe(),
            "add primary key Orders(a, b)"
        );
        assert_eq!(
            migrator.rename_table("Old", "New").describe(),
            "rename table Old to New"
        );
        match migrator.add_named_index("orders_by_day", "Orders", ["day"], false).kind {
            OperationKind::AddIndex { name, unique, .. } => {
                assert_eq!(name.as_deref(), Some("orders_by_day"));
                assert!(!unique);
            }
            _ => panic!("expected add index"),
        }
        match migrator.drop_model_tables(["A", "B"]).kind {
            OperationKind::DropTables(tables) => assert_eq!(tables, vec!["A", "B"]),
            _ => panic!("expected drop tables"),
        }
    }
}
