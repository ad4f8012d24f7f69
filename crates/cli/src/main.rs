mod logging;
mod output;

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use inquire::{Password, PasswordDisplayMode};
use ledger_migrate::{
    load_sql_migrations, DatabaseConfig, MigrateConfig, MigrationRegistry, MigrationRunner,
    PoolConfig, PostgresBackend,
};

use output::ConsoleObserver;

/// Apply pending schema migrations in dependency order
#[derive(Parser, Debug)]
#[command(name = "migrate", version, disable_help_flag = true)]
struct Cli {
    /// Database name
    #[arg(short = 'd', long, env = "DATABASE_NAME")]
    database: String,

    /// Database host
    #[arg(short = 'h', long, env = "DATABASE_HOST", default_value = "localhost")]
    host: String,

    /// Database port
    #[arg(short = 'p', long, env = "DATABASE_PORT", default_value_t = 5432)]
    port: u16,

    /// Database user
    #[arg(short = 'u', long, env = "DATABASE_USER")]
    user: Option<String>,

    /// Database password, prompted for when not given
    #[arg(long, env = "DATABASE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory containing `.sql` migration files
    #[arg(long, default_value = "migrations")]
    migrations_dir: PathBuf,

    /// List applied and pending migrations instead of applying them
    #[arg(long)]
    status: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Cli {
    fn database_config(&self, password: Option<String>) -> DatabaseConfig {
        DatabaseConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.user.clone(),
            password,
        }
    }
}

fn prompt_password() -> anyhow::Result<String> {
    Password::new("Database password:")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Hidden)
        .prompt()
        .context("Failed to read database password")
}

async fn print_status(
    runner: &MigrationRunner<PostgresBackend>,
    registry: &MigrationRegistry,
) -> anyhow::Result<()> {
    let status = runner.status(registry).await?;
    for line in output::status_lines(&status) {
        println!("{}", line);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let config = MigrateConfig::from_env().with_migrations_dir(cli.migrations_dir.clone());
    let registry = load_sql_migrations(&config.migrations_dir).with_context(|| {
        format!("Failed to load migrations from {}", config.migrations_dir.display())
    })?;
    tracing::debug!(count = registry.len(), "Loaded migrations");

    let password = match cli.password.clone() {
        Some(password) => password,
        None => prompt_password()?,
    };
    let database = cli.database_config(Some(password));
    let backend = PostgresBackend::connect(&database, &PoolConfig::default())
        .await
        .with_context(|| format!("Failed to connect to {}", database.display_url()))?;

    let runner = MigrationRunner::new(backend, &config);
    let result = if cli.status {
        print_status(&runner, &registry).await
    } else {
        runner
            .run(&registry, &mut ConsoleObserver::stdout())
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    };
    runner.close().await;

    result
}
