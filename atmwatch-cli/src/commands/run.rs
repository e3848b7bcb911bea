//! Run command - the full retrieval pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use atmwatch_core::{FanoutSink, ResultSink, Terminal};
use atmwatch_fetch::{BatchOrchestrator, DEFAULT_DEMO_TERMINALS, FetchContext, RunReport};
use atmwatch_store::{AppConfig, JsonArchive, SqliteStore};
use clap::Args;
use tracing::info;

use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the run command.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Use synthetic terminals instead of the upstream.
    #[arg(long)]
    pub demo: bool,

    /// Terminals per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Seconds between batches.
    #[arg(long)]
    pub delay: Option<u64>,

    /// Stop after this many batches.
    #[arg(long)]
    pub max_batches: Option<usize>,

    /// Concurrent fetch workers per batch.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Explicit terminal ids, comma-separated. Skips discovery.
    #[arg(long, value_delimiter = ',')]
    pub terminals: Vec<String>,

    /// Number of synthetic terminals in demo mode.
    #[arg(long)]
    pub demo_terminals: Option<usize>,

    /// Skip the JSON archive for this run.
    #[arg(long)]
    pub no_archive: bool,
}

impl RunArgs {
    /// Applies flag overrides on top of the loaded config.
    pub fn apply(&self, config: &mut AppConfig) {
        let r = &mut config.retrieval;
        if self.demo {
            r.demo_mode = true;
        }
        if let Some(n) = self.batch_size {
            r.batch_size = n;
        }
        if let Some(secs) = self.delay {
            r.delay = secs;
        }
        if let Some(n) = self.max_batches {
            r.max_batches = Some(n);
        }
        if let Some(n) = self.max_workers {
            r.max_workers = n;
        }
        if self.no_archive {
            config.storage.archive_enabled = false;
        }
    }

    /// Explicit terminal list, if any ids were given.
    pub fn explicit_terminals(&self) -> Option<Vec<Terminal>> {
        let terminals: Vec<Terminal> = self
            .terminals
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(Terminal::new)
            .collect();
        (!terminals.is_empty()).then_some(terminals)
    }
}

/// Runs the run command.
pub async fn run(args: &RunArgs, cli: &Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let report = execute(args, &config).await?;

    match cli.format {
        OutputFormat::Text => {
            if !cli.quiet {
                let formatter = TextFormatter::new(!cli.no_color);
                println!("{}", formatter.format_run(&report));
            }
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_run(&report)?);
        }
    }

    report.into_result()?;
    Ok(())
}

/// Builds the context and sinks from `config` and runs the pipeline once.
pub async fn execute(args: &RunArgs, config: &AppConfig) -> Result<RunReport> {
    let settings = config.fetch_settings();
    let ctx = if config.retrieval.demo_mode {
        let count = args.demo_terminals.unwrap_or(DEFAULT_DEMO_TERMINALS);
        info!(terminals = count, "Demo mode");
        FetchContext::demo(count, settings)
    } else {
        config.validate_live()?;
        FetchContext::live(
            &config.upstream.base_url,
            config.primary_credential(),
            config.fallback_credential(),
            settings,
        )
        .context("building upstream client")?
    };

    let sink = open_sinks(config)?;
    let orchestrator = BatchOrchestrator::new(&ctx, sink, config.pipeline_settings());

    Ok(orchestrator.run(args.explicit_terminals()).await?)
}

fn open_sinks(config: &AppConfig) -> Result<Arc<dyn ResultSink>> {
    let store = SqliteStore::open(&config.storage.database_path).with_context(|| {
        format!("opening database {}", config.storage.database_path.display())
    })?;

    let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(store)];
    if config.storage.archive_enabled {
        sinks.push(Box::new(JsonArchive::new(&config.storage.archive_dir)));
    }

    Ok(Arc::new(FanoutSink::new(sinks)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.database_path = dir.join("atmwatch.db");
        config.storage.archive_dir = dir.join("batches");
        config.retrieval.delay = 0;
        config
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = AppConfig::default();
        let args = RunArgs {
            demo: true,
            batch_size: Some(7),
            delay: Some(0),
            max_workers: Some(2),
            no_archive: true,
            ..RunArgs::default()
        };
        args.apply(&mut config);

        assert!(config.retrieval.demo_mode);
        assert_eq!(config.retrieval.batch_size, 7);
        assert_eq!(config.retrieval.delay, 0);
        assert_eq!(config.retrieval.max_workers, 2);
        assert!(!config.storage.archive_enabled);
    }

    #[test]
    fn test_explicit_terminals() {
        let args = RunArgs {
            terminals: vec![" T1".into(), String::new(), "T2".into()],
            ..RunArgs::default()
        };
        let ids: Vec<_> = args
            .explicit_terminals()
            .unwrap()
            .into_iter()
            .map(|t| t.terminal_id)
            .collect();
        assert_eq!(ids, ["T1", "T2"]);
        assert!(RunArgs::default().explicit_terminals().is_none());
    }

    #[tokio::test]
    async fn test_demo_run_persists_every_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = demo_config(dir.path());
        let args = RunArgs {
            demo: true,
            batch_size: Some(2),
            demo_terminals: Some(6),
            ..RunArgs::default()
        };
        args.apply(&mut config);

        let report = execute(&args, &config).await.unwrap().into_result().unwrap();
        assert_eq!(report.batches.len(), 3);
        assert_eq!(report.combined.total_terminals(), 6);
        assert!(report.execution.success);

        let store = SqliteStore::open(&config.storage.database_path).unwrap();
        assert_eq!(store.batch_count(report.execution.execution_id).await.unwrap(), 3);

        let archive = JsonArchive::new(&config.storage.archive_dir);
        let archived = archive.load_batches(report.execution.execution_id).await.unwrap();
        assert_eq!(archived.len(), 3);
    }

    #[tokio::test]
    async fn test_live_run_without_base_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = demo_config(dir.path());
        assert!(execute(&RunArgs::default(), &config).await.is_err());
    }
}
