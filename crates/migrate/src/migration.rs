//! Migration definitions
//!
//! A migration is any type implementing [`Migration`]. It is given a name
//! when registered and becomes a [`MigrationUnit`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MigrateResult;
use crate::models::ModelProvider;
use crate::operations::{Migrator, Operation};

/// One schema change with declared prerequisites
#[async_trait]
pub trait Migration: Send + Sync {
    /// Names of migrations that must be applied first
    fn dependencies(&self) -> Vec<String>;

    /// Initial migrations may run without any dependencies
    fn initial(&self) -> bool {
        false
    }

    /// Whether the whole migration runs inside one transaction
    fn atomic(&self) -> bool {
        true
    }

    /// Produce the operations to run, in order. Called once, at apply time.
    async fn migrate(
        &self,
        migrator: &Migrator,
        models: &mut ModelProvider<'_>,
    ) -> MigrateResult<Vec<Operation>>;
}

/// A named migration. Identity is the name alone.
#[derive(Clone)]
pub struct MigrationUnit {
    name: String,
    dependencies: Vec<String>,
    initial: bool,
    atomic: bool,
    migration: Arc<dyn Migration>,
}

impl MigrationUnit {
    pub fn new(name: impl Into<String>, migration: Arc<dyn Migration>) -> Self {
        Self {
            name: name.into(),
            dependencies: migration.dependencies(),
            initial: migration.initial(),
            atomic: migration.atomic(),
            migration,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn initial(&self) -> bool {
        self.initial
    }

    pub fn atomic(&self) -> bool {
        self.atomic
    }

    pub fn migration(&self) -> &dyn Migration {
        self.migration.as_ref()
    }
}

impl PartialEq for MigrationUnit {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MigrationUnit {}

impl Hash for MigrationUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Migration {}>", self.name)
    }
}

impl fmt::Display for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
