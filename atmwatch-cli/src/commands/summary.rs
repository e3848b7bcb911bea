//! Summary command - status counts of stored runs.

use anyhow::{Context, Result};
use atmwatch_store::{AppConfig, SqliteStore};
use clap::Args;
use tracing::info;

use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the summary command.
#[derive(Args, Debug, Default)]
pub struct SummaryArgs {
    /// Show per-run counts for the last N runs instead.
    #[arg(long, value_name = "N")]
    pub trend: Option<usize>,
}

/// Runs the summary command.
pub async fn run(args: &SummaryArgs, cli: &Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let store = SqliteStore::open(&config.storage.database_path).with_context(|| {
        format!("opening database {}", config.storage.database_path.display())
    })?;

    if let Some(runs) = args.trend {
        info!(runs, "Loading status trend");
        let trend = store.status_trend(runs).await?;
        match cli.format {
            OutputFormat::Text => {
                let formatter = TextFormatter::new(!cli.no_color);
                println!("{}", formatter.format_trend(&trend));
            }
            OutputFormat::Json => {
                let formatter = JsonFormatter::new(cli.pretty);
                println!("{}", formatter.format_trend(&trend)?);
            }
        }
        return Ok(());
    }

    let summary = store.status_summary().await?;
    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_summary(summary.as_ref()));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_summary(summary.as_ref())?);
        }
    }

    Ok(())
}
