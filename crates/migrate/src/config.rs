//! Configuration for migration runs and database connectivity

use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use url::Url;

use crate::error::{MigrateError, MigrateResult};

/// Environment variable overriding the ledger table name
pub const LEDGER_TABLE_ENV: &str = "DATABASE_MIGRATION_TABLE_NAME";

/// Default ledger table name
pub const DEFAULT_LEDGER_TABLE: &str = "databasemigration";

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Directory where `.sql` migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking applied migrations
    pub ledger_table: String,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl MigrateConfig {
    /// Build configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(table) = lookup(LEDGER_TABLE_ENV).filter(|t| !t.trim().is_empty()) {
            config.ledger_table = table;
        }
        config
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }
}

/// Connection parameters for a PostgreSQL database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: String::new(),
            username: None,
            password: None,
        }
    }
}

impl DatabaseConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    /// Validate that enough information is present to connect
    pub fn validate(&self) -> MigrateResult<()> {
        if self.database.trim().is_empty() {
            return Err(MigrateError::Configuration(
                "Database name is required".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(MigrateError::Configuration(
                "Database host is required".to_string(),
            ));
        }
        Ok(())
    }

    /// sqlx connect options for these parameters
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database);
        if let Some(username) = &self.username {
            options = options.username(username);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options
    }

    /// Connection URL with the password masked, for display
    pub fn display_url(&self) -> String {
        let mut url = match Url::parse("postgresql://localhost") {
            Ok(url) => url,
            Err(_) => return "postgresql://***".to_string(),
        };
        if url.set_host(Some(&self.host)).is_err() {
            return "postgresql://***".to_string();
        }
        let _ = url.set_port(Some(self.port));
        if let Some(username) = &self.username {
            let _ = url.set_username(username);
        }
        if self.password.is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.set_path(&self.database);
        url.to_string()
    }
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}
