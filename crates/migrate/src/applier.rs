//! Resolver/applier
//!
//! Applies pending migrations in passes. Each pass takes every migration
//! whose dependencies are already applied (or which is initial), applies
//! them one by one in registration order, then re-evaluates. A pass that
//! finds nothing ready while migrations remain is a hard failure.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, Transaction};
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::Ledger;
use crate::migration::MigrationUnit;
use crate::models::ModelProvider;
use crate::operations::{Migrator, Operation, OperationExecutor};

/// Progress callbacks for a run
pub trait ApplyObserver: Send {
    /// Number of migrations about to be applied
    fn on_plan(&mut self, _pending: usize) {}

    fn on_start(&mut self, _migration: &str) {}

    fn on_success(&mut self, _migration: &str) {}

    fn on_failure(&mut self, _migration: &str, _error: &MigrateError) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ApplyObserver for NoopObserver {}

/// Result of running migrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Names of applied migrations, in application order
    pub applied: Vec<String>,
    /// Registered migrations that were already in the ledger
    pub skipped: usize,
    /// Number of resolver passes
    pub passes: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Working state of one run
#[derive(Debug, Clone)]
pub struct ApplySet {
    pending: Vec<MigrationUnit>,
    applied: HashSet<String>,
}

impl ApplySet {
    /// Everything in `units` not already in `applied` becomes pending,
    /// keeping the order of `units`
    pub fn new<I>(units: I, applied: HashSet<String>) -> Self
    where
        I: IntoIterator<Item = MigrationUnit>,
    {
        let pending = units
            .into_iter()
            .filter(|u| !applied.contains(u.name()))
            .collect();
        Self { pending, applied }
    }

    pub fn pending(&self) -> &[MigrationUnit] {
        &self.pending
    }

    pub fn applied(&self) -> &HashSet<String> {
        &self.applied
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_ready(&self, unit: &MigrationUnit) -> bool {
        unit.initial()
            || unit
                .dependencies()
                .iter()
                .all(|dep| self.applied.contains(dep))
    }

    /// Remove and return the migrations ready at the start of this pass
    fn take_ready(&mut self) -> Vec<MigrationUnit> {
        let (ready, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|u| self.is_ready(u));
        self.pending = rest;
        ready
    }

    fn complete(&mut self, names: Vec<String>) {
        self.applied.extend(names);
    }

    fn pending_names(&self) -> Vec<String> {
        self.pending.iter().map(|u| u.name().to_string()).collect()
    }
}

/// Hands out strictly increasing timestamps at the ledger's precision
#[derive(Debug, Default)]
struct LedgerClock {
    last: Option<DateTime<Utc>>,
}

impl LedgerClock {
    fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(last) = self.last {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last = Some(now);
        now
    }
}

/// Applies an [`ApplySet`] against a backend
pub struct Applier<'a> {
    backend: &'a dyn Backend,
    ledger: &'a Ledger,
    migrator: Migrator,
    clock: LedgerClock,
}

impl<'a> Applier<'a> {
    pub fn new(backend: &'a dyn Backend, ledger: &'a Ledger) -> Self {
        Self {
            backend,
            ledger,
            migrator: Migrator::new(),
            clock: LedgerClock::default(),
        }
    }

    /// Apply every pending migration, pass by pass. Stops at the first
    /// failing migration; migrations committed before it stay applied.
    pub async fn apply(
        &mut self,
        mut set: ApplySet,
        observer: &mut dyn ApplyObserver,
    ) -> MigrateResult<ApplyReport> {
        let start = Instant::now();
        let mut report = ApplyReport::default();

        while !set.is_complete() {
            let ready = set.take_ready();
            if ready.is_empty() {
                let remaining = set.pending_names();
                error!(remaining = ?remaining, "No pending migration has its dependencies satisfied");
                return Err(MigrateError::UnresolvableDependencies { remaining });
            }

            report.passes += 1;
            debug!(
                pass = report.passes,
                ready = ready.len(),
                remaining = set.pending().len(),
                "Starting resolver pass"
            );

            let mut completed = Vec::with_capacity(ready.len());
            for unit in &ready {
                observer.on_start(unit.name());
                info!(migration = unit.name(), atomic = unit.atomic(), "Applying migration");

                if let Err(e) = self.apply_migration(unit).await {
                    error!(migration = unit.name(), error = %e, "Migration failed");
                    observer.on_failure(unit.name(), &e);
                    return Err(MigrateError::apply(unit.name(), e));
                }

                observer.on_success(unit.name());
                completed.push(unit.name().to_string());
                report.applied.push(unit.name().to_string());
            }
            set.complete(completed);
        }

        report.execution_time_ms = start.elapsed().as_millis();
        Ok(report)
    }

    async fn apply_migration(&mut self, unit: &MigrationUnit) -> MigrateResult<()> {
        if unit.atomic() && self.backend.supports_transactional_ddl() {
            let mut tx = self.backend.begin().await?;
            let result = self.apply_in_transaction(unit, tx.as_mut()).await;
            finish(tx, result).await
        } else {
            self.apply_per_operation(unit).await
        }
    }

    /// Operations and ledger row share one transaction
    async fn apply_in_transaction(
        &mut self,
        unit: &MigrationUnit,
        tx: &mut dyn Transaction,
    ) -> MigrateResult<()> {
        let operations = self.produce(unit).await?;
        let executor = OperationExecutor::new();
        for op in &operations {
            executor.execute(op, tx.as_connection()).await?;
        }
        let applied_at = self.clock.now();
        self.ledger
            .record(tx.as_connection(), unit.name(), applied_at)
            .await
    }

    /// Each operation decides its own scope; the ledger row is written in a
    /// separate transaction once all operations succeeded
    async fn apply_per_operation(&mut self, unit: &MigrationUnit) -> MigrateResult<()> {
        let operations = self.produce(unit).await?;
        let executor = OperationExecutor::new();

        for op in &operations {
            if self.wants_own_transaction(unit, op) {
                let mut tx = self.backend.begin().await?;
                let result = executor.execute(op, tx.as_connection()).await;
                finish(tx, result).await?;
            } else {
                let mut conn = self.backend.acquire().await?;
                executor.execute(op, conn.as_mut()).await?;
            }
        }

        let applied_at = self.clock.now();
        let mut tx = self.backend.begin().await?;
        let result = self
            .ledger
            .record(tx.as_connection(), unit.name(), applied_at)
            .await;
        finish(tx, result).await
    }

    fn wants_own_transaction(&self, unit: &MigrationUnit, op: &Operation) -> bool {
        !self.backend.supports_transactional_ddl() || (op.atomic && !unit.atomic())
    }

    async fn produce(&self, unit: &MigrationUnit) -> MigrateResult<Vec<Operation>> {
        let mut models = ModelProvider::new(self.backend);
        let operations = unit.migration().migrate(&self.migrator, &mut models).await?;
        debug!(
            migration = unit.name(),
            operations = operations.len(),
            introspected = models.is_generated(),
            "Produced operations"
        );
        Ok(operations)
    }
}

/// Commit on success, roll back on failure and return the original error
async fn finish(tx: Box<dyn Transaction>, result: MigrateResult<()>) -> MigrateResult<()> {
    match result {
        Ok(()) => tx.commit().await,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}
