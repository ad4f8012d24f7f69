//! Migrations loaded from a directory of `.sql` files
//!
//! Each file is one migration named after its file stem. Leading comment
//! lines carry metadata:
//!
//! ```sql
//! -- depends: 0001_initial, 0002_users
//! -- atomic: false
//! CREATE INDEX CONCURRENTLY users_email ON users (email);
//! ```
//!
//! `-- initial` (or `-- initial: true`) marks a migration that needs no
//! dependencies. `initial` and `atomic` accept only `true` or `false`.
//! `depends` may be repeated. Files are registered in file-name order.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{MigrateError, MigrateResult};
use crate::migration::Migration;
use crate::models::ModelProvider;
use crate::operations::{Migrator, Operation};
use crate::registry::MigrationRegistry;

/// A migration backed by plain SQL statements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    dependencies: Vec<String>,
    initial: bool,
    atomic: bool,
    statements: Vec<String>,
}

impl SqlMigration {
    /// Parse file content: header comments first, then the SQL body.
    /// `initial` and `atomic` take `true` or `false`; anything else is an
    /// error rather than a silently ignored header.
    pub fn parse(content: &str) -> MigrateResult<Self> {
        let mut dependencies = Vec::new();
        let mut initial = false;
        let mut atomic = true;
        let mut body_start = content.len();

        let mut offset = 0;
        for line in content.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                offset += line.len();
                continue;
            }
            let Some(comment) = trimmed.strip_prefix("--") else {
                body_start = offset;
                break;
            };

            let comment = comment.trim();
            if let Some(deps) = strip_directive(comment, "depends") {
                dependencies.extend(
                    deps.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(str::to_string),
                );
            } else if let Some(value) = strip_directive(comment, "atomic") {
                atomic = parse_flag("atomic", value)?;
            } else if let Some(value) = strip_directive(comment, "initial") {
                initial = parse_flag("initial", value)?;
            } else if comment.eq_ignore_ascii_case("initial") {
                initial = true;
            }
            offset += line.len();
        }

        Ok(Self {
            dependencies,
            initial,
            atomic,
            statements: split_sql_statements(&content[body_start..]),
        })
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

fn parse_flag(key: &str, value: &str) -> MigrateResult<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(MigrateError::Source(format!(
            "Invalid value \"{}\" for header \"{}\", expected true or false",
            value, key
        )))
    }
}

/// `key: value` with a case-insensitive key
fn strip_directive<'a>(comment: &'a str, key: &str) -> Option<&'a str> {
    let (name, value) = comment.split_once(':')?;
    name.trim()
        .eq_ignore_ascii_case(key)
        .then(|| value.trim())
}

#[async_trait]
impl Migration for SqlMigration {
    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn initial(&self) -> bool {
        self.initial
    }

    fn atomic(&self) -> bool {
        self.atomic
    }

    async fn migrate(
        &self,
        migrator: &Migrator,
        _models: &mut ModelProvider<'_>,
    ) -> MigrateResult<Vec<Operation>> {
        Ok(self
            .statements
            .iter()
            .map(|sql| {
                let op = migrator.raw(sql.as_str());
                // statements of a non-atomic file run outside any transaction
                if self.atomic {
                    op
                } else {
                    op.non_atomic()
                }
            })
            .collect())
    }
}

/// Split a SQL body into individual statements
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(parsed) => parsed.into_iter().map(|stmt| stmt.to_string()).collect(),
        Err(e) => {
            tracing::warn!("SQL parsing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

/// Register every `.sql` file in `dir`. A missing directory yields an empty
/// registry.
pub fn load_sql_migrations(dir: &Path) -> MigrateResult<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Migrations directory does not exist");
        return Ok(registry);
    }

    let entries = fs::read_dir(dir).map_err(|e| {
        MigrateError::Source(format!("Failed to read migrations directory {}: {}", dir.display(), e))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| MigrateError::Source(format!("Failed to read directory entry: {}", e)))?;
        let path = entry.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                MigrateError::Source(format!("Invalid migration filename: {}", path.display()))
            })?
            .to_string();
        let content = fs::read_to_string(&path).map_err(|e| {
            MigrateError::Source(format!("Failed to read migration file {}: {}", path.display(), e))
        })?;

        let migration = SqlMigration::parse(&content).map_err(|e| match e {
            MigrateError::Source(msg) => {
                MigrateError::Source(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        tracing::debug!(
            migration = %name,
            statements = migration.statements.len(),
            "Loaded SQL migration"
        );
        registry.register(name, migration)?;
    }

    Ok(registry)
}
