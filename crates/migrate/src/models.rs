//! Live schema descriptors and the lazily populated model provider
//!
//! Migrations that need to look at the current schema receive a
//! [`ModelProvider`]. It introspects nothing until a table is first
//! requested, then keeps that snapshot for the rest of the migration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::{MigrateError, MigrateResult};

/// A single column of an introspected or declared table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// SQL type as it should appear in DDL, e.g. `VARCHAR(255)`
    pub data_type: String,
    pub nullable: bool,
    /// Default expression, verbatim
    pub default: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// Table model used both for introspection results and for create-table
/// operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Point-in-time view of the tables in a database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableDescriptor>,
}

impl SchemaSnapshot {
    pub fn get(&self, table: &str) -> Option<&TableDescriptor> {
        self.tables.get(table)
    }

    pub fn insert(&mut self, table: TableDescriptor) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Lazily introspected table models handed to each migration
pub struct ModelProvider<'a> {
    backend: &'a dyn Backend,
    snapshot: Option<SchemaSnapshot>,
}

impl<'a> ModelProvider<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            snapshot: None,
        }
    }

    /// Whether a snapshot has already been taken
    pub fn is_generated(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Look up a table, introspecting the whole schema on first use
    pub async fn get(&mut self, table: &str) -> MigrateResult<TableDescriptor> {
        let snapshot = self.snapshot().await?;
        snapshot.get(table).cloned().ok_or_else(|| {
            MigrateError::Introspection(format!("Table \"{}\" not found in live schema", table))
        })
    }

    /// The full snapshot, taking it on first use
    pub async fn snapshot(&mut self) -> MigrateResult<&SchemaSnapshot> {
        if self.snapshot.is_none() {
            tracing::debug!("Introspecting live schema");
            self.snapshot = Some(self.backend.introspect(None).await?);
        }
        // populated above
        self.snapshot
            .as_ref()
            .ok_or_else(|| MigrateError::Introspection("Schema snapshot unavailable".to_string()))
    }

    /// Snapshot only the given tables, replacing any earlier snapshot
    pub async fn preload(&mut self, tables: &[&str]) -> MigrateResult<()> {
        let names: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        tracing::debug!(tables = ?names, "Preloading table models");
        self.snapshot = Some(self.backend.introspect(Some(&names)).await?);
        Ok(())
    }
}
