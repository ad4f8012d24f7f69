//! Console output for runs and status listings

use std::io::{self, Write};

use console::style;
use ledger_migrate::{ApplyObserver, MigrateError, MigrationStatus};

/// Prints `Running <name>...Success` style progress. Write errors are
/// ignored so a closed stdout does not fail the run.
pub struct ConsoleObserver<W: Write + Send> {
    out: W,
}

impl ConsoleObserver<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: std::fmt::Arguments<'_>, newline: bool) {
        let _ = self.out.write_fmt(text);
        if newline {
            let _ = self.out.write_all(b"\n");
        }
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> ApplyObserver for ConsoleObserver<W> {
    fn on_plan(&mut self, pending: usize) {
        if pending == 0 {
            self.emit(format_args!("No migrations to apply"), true);
        } else {
            self.emit(format_args!("Applying {} migration(s)", pending), true);
        }
    }

    fn on_start(&mut self, migration: &str) {
        self.emit(format_args!("Running {}...", migration), false);
    }

    fn on_success(&mut self, _migration: &str) {
        self.emit(format_args!("{}", style("Success").green()), true);
    }

    fn on_failure(&mut self, _migration: &str, _error: &MigrateError) {
        self.emit(format_args!("{}", style("Failed").red()), true);
    }
}

/// One line per registered migration
pub fn status_lines(status: &[MigrationStatus]) -> Vec<String> {
    if status.is_empty() {
        return vec!["No migrations found".to_string()];
    }

    let width = status.iter().map(|s| s.name.len()).max().unwrap_or(0);
    status
        .iter()
        .map(|s| match s.applied_at {
            Some(at) => format!(
                "{} {:width$}  {}",
                style("applied").green(),
                s.name,
                at.format("%Y-%m-%d %H:%M:%S UTC"),
                width = width
            ),
            None => format!("{} {}", style("pending").yellow(), s.name),
        })
        .collect()
}
