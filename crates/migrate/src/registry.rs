//! Ordered collection of registered migrations

use std::sync::Arc;

use crate::error::{MigrateError, MigrateResult};
use crate::migration::{Migration, MigrationUnit};

/// Migrations known to a run, in registration order
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    units: Vec<MigrationUnit>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration under `name`. Names must be unique.
    pub fn register<M>(&mut self, name: impl Into<String>, migration: M) -> MigrateResult<()>
    where
        M: Migration + 'static,
    {
        self.register_arc(name, Arc::new(migration))
    }

    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        migration: Arc<dyn Migration>,
    ) -> MigrateResult<()> {
        self.push(MigrationUnit::new(name, migration))
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<M>(mut self, name: impl Into<String>, migration: M) -> MigrateResult<Self>
    where
        M: Migration + 'static,
    {
        self.register(name, migration)?;
        Ok(self)
    }

    pub fn push(&mut self, unit: MigrationUnit) -> MigrateResult<()> {
        if self.units.contains(&unit) {
            return Err(MigrateError::DuplicateMigration(unit.name().to_string()));
        }
        tracing::trace!(migration = unit.name(), "Registered migration");
        self.units.push(unit);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.name() == name)
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.units.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(MigrationUnit::name).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
