//! # ledger-migrate: dependency-ordered schema migrations
//!
//! Migrations are named units that declare their dependencies and produce
//! a list of schema operations. A run validates the registry, reads the
//! ledger of already-applied names, then applies everything else in passes
//! so that a migration only runs once all of its dependencies have. Each
//! successful migration is recorded in the ledger, on the same transaction
//! as its operations when the backend allows it.
//!
//! ```no_run
//! use ledger_migrate::{
//!     load_sql_migrations, DatabaseConfig, MigrateConfig, MigrationRunner, NoopObserver,
//!     PoolConfig, PostgresBackend,
//! };
//!
//! # async fn run() -> ledger_migrate::MigrateResult<()> {
//! let config = MigrateConfig::from_env();
//! let backend = PostgresBackend::connect(&DatabaseConfig::new("app"), &PoolConfig::default()).await?;
//! let registry = load_sql_migrations(&config.migrations_dir)?;
//!
//! let runner = MigrationRunner::new(backend, &config);
//! let report = runner.run(&registry, &mut NoopObserver).await?;
//! println!("applied {} migration(s)", report.applied_count());
//! runner.close().await;
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod backend;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod models;
pub mod operations;
pub mod registry;
pub mod runner;
pub mod source;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use applier::{Applier, ApplyObserver, ApplyReport, ApplySet, NoopObserver};
pub use backend::{Backend, Connection, PostgresBackend, SqlRow, SqlValue, Transaction};
pub use config::{DatabaseConfig, MigrateConfig, PoolConfig, DEFAULT_LEDGER_TABLE, LEDGER_TABLE_ENV};
pub use error::{MigrateError, MigrateResult};
pub use ledger::{Ledger, LedgerEntry};
pub use migration::{Migration, MigrationUnit};
pub use models::{ColumnDescriptor, ModelProvider, SchemaSnapshot, TableDescriptor};
pub use operations::{Migrator, Operation, OperationCallback, OperationExecutor, OperationKind};
pub use registry::MigrationRegistry;
pub use runner::{MigrationRunner, MigrationStatus};
pub use source::{load_sql_migrations, SqlMigration};
pub use validation::validate;

// Async trait re-export so migration authors don't need a direct dependency
pub use async_trait::async_trait;
