use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use daymark::{
    config::{self, RunOptions},
    pipeline, store,
};

#[derive(Parser)]
#[command(author, version, about = "Migrate raw metric events into daily aggregates")]
struct Cli {
    /// Path to the configuration file. Defaults to ./daymark.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Echo every SQL statement as it is executed
    #[arg(short = 'd', long)]
    log_sql: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(()) => {
            println!("DONE");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("transfer failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = config::load_or_default(cli.config).context("failed to load configuration")?;
    let options = RunOptions {
        log_sql: cli.log_sql,
    };

    let mut source =
        store::open_source(&config.source, options).context("failed to open source store")?;
    let mut target =
        store::open_target(&config.target, options).context("failed to open target store")?;

    let summary = pipeline::run(source.as_mut(), target.as_mut())?;
    info!(
        "transfer complete: {} event(s) scanned, {} bucket(s) written",
        summary.events_scanned, summary.buckets_written
    );
    Ok(())
}
