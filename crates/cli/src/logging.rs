//! Log setup for the `migrate` binary
//!
//! Logs go to stderr so they never interleave with the progress lines on
//! stdout. `RUST_LOG` overrides the level chosen by `--verbose`.

use std::io;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "ledger_migrate=debug,migrate=debug,sqlx=warn,info"
    } else {
        "warn"
    }
}

pub fn init(verbose: bool) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter(verbose)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(Layer::new().with_writer(io::stderr).with_target(verbose))
        .try_init()?;
    Ok(())
}
