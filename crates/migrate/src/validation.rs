//! Dependency validation, run before the database is touched

use std::collections::HashSet;

use crate::error::{MigrateError, MigrateResult};
use crate::migration::MigrationUnit;

/// Check that every non-initial migration declares dependencies and that
/// every dependency names a known migration. Cycles are not detected here;
/// the applier reports them when it stops making progress.
pub fn validate(units: &[MigrationUnit]) -> MigrateResult<()> {
    let known: HashSet<&str> = units.iter().map(MigrationUnit::name).collect();

    for unit in units {
        if unit.dependencies().is_empty() && !unit.initial() {
            return Err(MigrateError::MissingDependencies {
                migration: unit.name().to_string(),
            });
        }
        if let Some(missing) = unit
            .dependencies()
            .iter()
            .find(|dep| !known.contains(dep.as_str()))
        {
            return Err(MigrateError::UnknownDependency {
                migration: unit.name().to_string(),
                dependency: missing.clone(),
            });
        }
    }

    Ok(())
}
