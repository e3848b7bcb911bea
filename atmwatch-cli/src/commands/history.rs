//! History command - recent execution records.

use anyhow::{Context, Result};
use atmwatch_store::{AppConfig, SqliteStore};
use clap::Args;

use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the history command.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of runs to show.
    #[arg(long, short = 'n', default_value = "10")]
    pub limit: usize,
}

/// Runs the history command.
pub async fn run(args: &HistoryArgs, cli: &Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let store = SqliteStore::open(&config.storage.database_path).with_context(|| {
        format!("opening database {}", config.storage.database_path.display())
    })?;

    let records = store.recent_executions(args.limit).await?;

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_history(&records));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_history(&records)?);
        }
    }

    Ok(())
}
