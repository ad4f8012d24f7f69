//! Error types for the migration system
//!
//! Validation errors are raised before the database is touched. Everything
//! else surfaces while a run is in progress and aborts it.

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration runs
#[derive(Debug, Error)]
pub enum MigrateError {
    /// A non-initial migration declares no dependencies
    #[error("Migration \"{migration}\" has no dependencies and is not initial")]
    MissingDependencies { migration: String },

    /// A declared dependency does not name a known migration
    #[error("Dependency \"{dependency}\" for {migration} not found")]
    UnknownDependency {
        migration: String,
        dependency: String,
    },

    /// Two migrations were registered under the same name
    #[error("Migration \"{0}\" is registered more than once")]
    DuplicateMigration(String),

    /// No pending migration could be made ready
    #[error("Unresolvable dependencies for migration(s): {}", remaining.join(", "))]
    UnresolvableDependencies { remaining: Vec<String> },

    /// A single operation failed against the database
    #[error("Operation {operation} failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// A migration failed and was rolled back
    #[error("Migration {migration} failed: {source}")]
    MigrationApply {
        migration: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// The ledger already holds an entry with this name
    #[error("Ledger already contains migration \"{name}\"")]
    LedgerConflict { name: String },

    /// Unique constraint violated by a statement
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Database query error
    #[error("Database error: {0}")]
    Database(String),

    /// Connection or pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction begin/commit/rollback error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// An operation was built with invalid parameters
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Schema introspection error
    #[error("Introspection error: {0}")]
    Introspection(String),

    /// Migration source could not be read
    #[error("Migration source error: {0}")]
    Source(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MigrateError {
    pub(crate) fn operation(operation: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Operation {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn apply(migration: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::MigrationApply {
            migration: migration.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error was raised while validating the registry, i.e.
    /// before any database mutation happened
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            MigrateError::MissingDependencies { .. }
                | MigrateError::UnknownDependency { .. }
                | MigrateError::DuplicateMigration(_)
        )
    }

    /// Innermost error, following `Operation` and `MigrationApply` wrappers
    pub fn root_cause(&self) -> &MigrateError {
        match self {
            MigrateError::Operation { source, .. } | MigrateError::MigrationApply { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for MigrateError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("23505") {
                return MigrateError::UniqueViolation(db_err.message().to_string());
            }
        }
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                MigrateError::Connection(err.to_string())
            }
            other => MigrateError::Database(other.to_string()),
        }
    }
}

// Convert from io errors raised while reading migration sources
impl From<std::io::Error> for MigrateError {
    fn from(err: std::io::Error) -> Self {
        MigrateError::Source(err.to_string())
    }
}
