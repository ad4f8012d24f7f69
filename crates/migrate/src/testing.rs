//! In-memory backend for unit tests
//!
//! Statements are recorded rather than executed. Transactions work on a copy
//! of the state that replaces the shared state on commit, so rolled back
//! work is never observable. Any statement containing `FAIL` errors.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backend::{Backend, Connection, SqlRow, SqlValue, Transaction};
use crate::config::DEFAULT_LEDGER_TABLE;
use crate::error::{MigrateError, MigrateResult};
use crate::models::{SchemaSnapshot, TableDescriptor};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    ledger_exists: bool,
    ledger: Vec<(String, DateTime<Utc>)>,
    statements: Vec<String>,
    tables: BTreeMap<String, TableDescriptor>,
    constraints: HashMap<String, Vec<String>>,
    indexes: HashMap<String, Vec<String>>,
}

impl MemoryState {
    fn execute(&mut self, ledger_table: &str, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        if sql.contains("FAIL") {
            return Err(MigrateError::Database(format!("simulated failure: {}", sql)));
        }

        let ledger_ident = format!("\"{}\"", ledger_table);
        if sql.contains(&ledger_ident) {
            if sql.starts_with("CREATE TABLE") {
                self.ledger_exists = true;
                return Ok(0);
            }
            if sql.starts_with("INSERT INTO") {
                if !self.ledger_exists {
                    return Err(MigrateError::Database(format!(
                        "relation {} does not exist",
                        ledger_ident
                    )));
                }
                let name = params
                    .first()
                    .and_then(SqlValue::as_str)
                    .ok_or_else(|| MigrateError::Database("missing name parameter".to_string()))?;
                let applied = params
                    .get(1)
                    .and_then(SqlValue::as_timestamp)
                    .ok_or_else(|| MigrateError::Database("missing applied parameter".to_string()))?;
                if self.ledger.iter().any(|(n, _)| n == name) {
                    return Err(MigrateError::UniqueViolation(format!(
                        "duplicate key value violates unique constraint on name ({})",
                        name
                    )));
                }
                self.ledger.push((name.to_string(), applied));
                return Ok(1);
            }
        }

        if let Some(table) = created_table(sql) {
            self.tables
                .entry(table.clone())
                .or_insert_with(|| TableDescriptor::new(table));
        }
        self.statements.push(sql.to_string());
        Ok(0)
    }

    fn snapshot(&self, tables: Option<&[String]>) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();
        for table in self.tables.values() {
            if tables.map_or(true, |names| names.contains(&table.name)) {
                snapshot.insert(table.clone());
            }
        }
        snapshot
    }

    fn fetch_all(&self, ledger_table: &str, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
        if sql.contains("FAIL") {
            return Err(MigrateError::Database(format!("simulated failure: {}", sql)));
        }

        let by_table = |map: &HashMap<String, Vec<String>>| -> Vec<SqlRow> {
            let table = params.first().and_then(SqlValue::as_str).unwrap_or_default();
            map.get(table)
                .map(|names| names.iter().map(|n| vec![SqlValue::Text(n.clone())]).collect())
                .unwrap_or_default()
        };
        if sql.contains("pg_constraint") {
            return Ok(by_table(&self.constraints));
        }
        if sql.contains("pg_indexes") {
            return Ok(by_table(&self.indexes));
        }

        if sql.contains(&format!("\"{}\"", ledger_table)) {
            if !self.ledger_exists {
                return Err(MigrateError::Database(format!(
                    "relation \"{}\" does not exist",
                    ledger_table
                )));
            }
            let filter = if sql.contains("WHERE name = $1") {
                params.first().and_then(SqlValue::as_str)
            } else {
                None
            };
            let mut entries: Vec<_> = self
                .ledger
                .iter()
                .filter(|(name, _)| filter.map_or(true, |f| f == name))
                .collect();
            entries.sort_by_key(|(_, applied)| *applied);
            let with_applied = sql.starts_with("SELECT name, applied");
            return Ok(entries
                .into_iter()
                .map(|(name, applied)| {
                    let mut row = vec![SqlValue::Text(name.clone())];
                    if with_applied {
                        row.push(SqlValue::Timestamp(*applied));
                    }
                    row
                })
                .collect());
        }

        Ok(Vec::new())
    }
}

/// Table name of a `CREATE TABLE [IF NOT EXISTS] name ...` statement
fn created_table(sql: &str) -> Option<String> {
    let rest = sql.strip_prefix("CREATE TABLE ")?;
    let rest = rest.strip_prefix("IF NOT EXISTS ").unwrap_or(rest);
    let name = rest
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()?
        .trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}

/// Shared handle; clones observe the same database
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    events: Arc<Mutex<Vec<String>>>,
    introspections: Arc<AtomicUsize>,
    ledger_table: String,
    transactional_ddl: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            events: Arc::new(Mutex::new(Vec::new())),
            introspections: Arc::new(AtomicUsize::new(0)),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            transactional_ddl: true,
        }
    }

    pub fn without_transactional_ddl(mut self) -> Self {
        self.transactional_ddl = false;
        self
    }

    pub fn with_ledger_table(mut self, table: &str) -> Self {
        self.ledger_table = table.to_string();
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    fn event(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn add_table(&self, table: TableDescriptor) {
        self.lock().tables.insert(table.name.clone(), table);
    }

    pub fn set_constraints(&self, table: &str, names: &[&str]) {
        self.lock()
            .constraints
            .insert(table.to_string(), names.iter().map(|n| n.to_string()).collect());
    }

    pub fn set_indexes(&self, table: &str, names: &[&str]) {
        self.lock()
            .indexes
            .insert(table.to_string(), names.iter().map(|n| n.to_string()).collect());
    }

    /// Start with an empty ledger table
    pub fn seed_ledger_table(self) -> Self {
        self.seed_ledger(&[]);
        self
    }

    /// Pretend these migrations were applied by an earlier run
    pub fn seed_ledger(&self, names: &[&str]) {
        let mut state = self.lock();
        state.ledger_exists = true;
        for name in names {
            state.ledger.push((name.to_string(), Utc::now()));
        }
    }

    pub fn ledger_exists(&self) -> bool {
        self.lock().ledger_exists
    }

    /// Ledger entries in insertion order
    pub fn ledger(&self) -> Vec<(String, DateTime<Utc>)> {
        self.lock().ledger.clone()
    }

    pub fn ledger_names(&self) -> Vec<String> {
        self.lock().ledger.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Committed statements, in execution order
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// `begin`, `commit`, `rollback` and `acquire` in call order
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn introspection_count(&self) -> usize {
        self.introspections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>> {
        self.event("begin");
        let working = self.lock().clone();
        Ok(Box::new(MemoryTransaction {
            backend: self.clone(),
            working,
        }))
    }

    async fn acquire(&self) -> MigrateResult<Box<dyn Connection>> {
        self.event("acquire");
        Ok(Box::new(MemoryConnection {
            backend: self.clone(),
        }))
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.transactional_ddl
    }

    async fn introspect(&self, tables: Option<&[String]>) -> MigrateResult<SchemaSnapshot> {
        self.introspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().snapshot(tables))
    }
}

/// Autocommit connection writing straight to the shared state
pub struct MemoryConnection {
    backend: MemoryBackend,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        let table = self.backend.ledger_table.clone();
        self.backend.lock().execute(&table, sql, params)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
        self.backend.lock().fetch_all(&self.backend.ledger_table, sql, params)
    }

    async fn introspect(&mut self, tables: Option<&[String]>) -> MigrateResult<SchemaSnapshot> {
        self.backend.introspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend.lock().snapshot(tables))
    }
}

/// Transaction over a private copy of the state
pub struct MemoryTransaction {
    backend: MemoryBackend,
    working: MemoryState,
}

#[async_trait]
impl Connection for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        self.working.execute(&self.backend.ledger_table, sql, params)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
        self.working.fetch_all(&self.backend.ledger_table, sql, params)
    }

    async fn introspect(&mut self, tables: Option<&[String]>) -> MigrateResult<SchemaSnapshot> {
        self.backend.introspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.working.snapshot(tables))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn as_connection(&mut self) -> &mut dyn Connection {
        self
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        let MemoryTransaction { backend, working } = *self;
        backend.event("commit");
        *backend.lock() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        self.backend.event("rollback");
        Ok(())
    }
}

/// Migration returning a fixed list of operations
#[derive(Clone, Default)]
pub struct StaticMigration {
    dependencies: Vec<String>,
    initial: bool,
    atomic: bool,
    operations: Vec<crate::operations::Operation>,
    lookup: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl StaticMigration {
    pub fn initial() -> Self {
        Self {
            initial: true,
            atomic: true,
            ..Default::default()
        }
    }

    pub fn depends_on(dependencies: &[&str]) -> Self {
        Self {
            atomic: true,
            ..Default::default()
        }
        .with_dependencies(dependencies)
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn non_atomic(mut self) -> Self {
        self.atomic = false;
        self
    }

    /// One raw SQL operation per statement
    pub fn sql(mut self, statements: &[&str]) -> Self {
        let migrator = crate::operations::Migrator::new();
        self.operations
            .extend(statements.iter().map(|s| migrator.raw(*s)));
        self
    }

    pub fn operation(mut self, operation: crate::operations::Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Look up a table model before producing operations
    pub fn looking_up(mut self, table: &str) -> Self {
        self.lookup = Some(table.to_string());
        self
    }

    pub fn call_count(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl crate::migration::Migration for StaticMigration {
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
        _migrator: &crate::operations::Migrator,
        models: &mut crate::models::ModelProvider<'_>,
    ) -> MigrateResult<Vec<crate::operations::Operation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(table) = &self.lookup {
            models.get(table).await?;
        }
        Ok(self.operations.clone())
    }
}
