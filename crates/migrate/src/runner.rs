//! Migration Runner - orchestrates one run against a backend
//!
//! Validation happens before the database is touched. The ledger table is
//! created on demand, the applied set is read once, and everything not in
//! it is handed to the [`Applier`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::applier::{Applier, ApplyObserver, ApplyReport, ApplySet};
use crate::backend::Backend;
use crate::config::MigrateConfig;
use crate::error::MigrateResult;
use crate::ledger::Ledger;
use crate::registry::MigrationRegistry;
use crate::validation::validate;

/// Applied state of one registered migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub name: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Migration runner that applies a registry against a database
pub struct MigrationRunner<B: Backend> {
    backend: B,
    ledger: Ledger,
}

impl<B: Backend> MigrationRunner<B> {
    pub fn new(backend: B, config: &MigrateConfig) -> Self {
        Self {
            backend,
            ledger: Ledger::new(config.ledger_table.clone()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply every pending migration in `registry`
    pub async fn run(
        &self,
        registry: &MigrationRegistry,
        observer: &mut dyn ApplyObserver,
    ) -> MigrateResult<ApplyReport> {
        validate(registry.units())?;

        let applied = {
            let mut conn = self.backend.acquire().await?;
            self.ledger.ensure_exists(conn.as_mut()).await?;
            self.ledger.load_applied(conn.as_mut()).await?
        };

        let set = ApplySet::new(registry.units().iter().cloned(), applied);
        let pending = set.pending().len();
        let skipped = registry.len() - pending;

        info!(
            registered = registry.len(),
            pending,
            skipped,
            ledger = self.ledger.table(),
            "Planned migration run"
        );
        observer.on_plan(pending);

        let mut applier = Applier::new(&self.backend, &self.ledger);
        let mut report = applier.apply(set, observer).await?;
        report.skipped = skipped;

        info!(
            applied = report.applied_count(),
            passes = report.passes,
            execution_time_ms = report.execution_time_ms as u64,
            "Migration run finished"
        );
        Ok(report)
    }

    /// Names of registered migrations not yet in the ledger, in registry order
    pub async fn pending(&self, registry: &MigrationRegistry) -> MigrateResult<Vec<String>> {
        let status = self.status(registry).await?;
        Ok(status
            .into_iter()
            .filter(|s| !s.is_applied())
            .map(|s| s.name)
            .collect())
    }

    /// Applied state of every registered migration, in registry order
    pub async fn status(&self, registry: &MigrationRegistry) -> MigrateResult<Vec<MigrationStatus>> {
        let mut conn = self.backend.acquire().await?;
        self.ledger.ensure_exists(conn.as_mut()).await?;
        let entries: HashMap<String, DateTime<Utc>> = self
            .ledger
            .load_entries(conn.as_mut())
            .await?
            .into_iter()
            .map(|e| (e.name, e.applied_at))
            .collect();
        debug!(entries = entries.len(), "Loaded ledger entries");

        Ok(registry
            .iter()
            .map(|unit| MigrationStatus {
                name: unit.name().to_string(),
                applied_at: entries.get(unit.name()).copied(),
            })
            .collect())
    }

    /// Release the backend's connections
    pub async fn close(self) {
        self.backend.close().await;
    }
}
