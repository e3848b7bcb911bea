// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! atmwatch CLI - ATM fleet status retrieval from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Full run against the configured upstream
//! atmwatch
//!
//! # Offline run with synthetic terminals
//! atmwatch run --demo --batch-size 5 --delay 0
//!
//! # Only these terminals
//! atmwatch run --terminals T0001,T0002
//!
//! # Probe and log in, nothing else
//! atmwatch check
//!
//! # Status counts of the latest run
//! atmwatch summary --format json --pretty
//!
//! # Last runs
//! atmwatch history --limit 5
//! ```

mod commands;
mod output;

use std::path::PathBuf;

use atmwatch_fetch::{AuthError, FetchError};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{check, history, run, summary};

// ============================================================================
// CLI Definition
// ============================================================================

/// atmwatch CLI - ATM fleet status retrieval.
#[derive(Parser)]
#[command(name = "atmwatch")]
#[command(about = "ATM fleet status retrieval CLI")]
#[command(long_about = r#"
atmwatch logs in to the ATM monitoring API, fetches every terminal's
detail in sequential batches, and stores each batch as soon as it is done.

Examples:
  atmwatch                          # Full run (same as 'atmwatch run')
  atmwatch --demo --batch-size 5    # Offline run with synthetic terminals
  atmwatch check                    # Probe + login + logout
  atmwatch summary                  # Status counts of the latest run
  atmwatch history --limit 5        # Recent runs
"#)]
#[command(version)]
#[command(author = "atmwatch contributors")]
pub struct Cli {
    /// Subcommand to run. If none, runs 'run' by default.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Run flags for the default command.
    #[command(flatten)]
    pub run: run::RunArgs,

    /// Config file path.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Quiet mode (minimal output).
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the retrieval pipeline (default if no command specified).
    #[command(visible_alias = "r")]
    Run(run::RunArgs),

    /// Probe the upstream and verify the credentials.
    Check,

    /// Show status counts of the latest run.
    #[command(visible_alias = "s")]
    Summary(summary::SummaryArgs),

    /// List recent runs.
    #[command(visible_alias = "h")]
    History(history::HistoryArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text with colors.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success.
    Success = 0,
    /// General error.
    Error = 1,
    /// Neither credential could log in.
    AuthFailed = 2,
    /// No batch succeeded.
    RunFailed = 3,
}

impl ExitCode {
    /// Classifies an error by the first pipeline error in its chain.
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(fetch) = cause.downcast_ref::<FetchError>() {
                return match fetch {
                    FetchError::Auth(_) => Self::AuthFailed,
                    FetchError::RunFailed(_) => Self::RunFailed,
                    _ => Self::Error,
                };
            }
            if cause.downcast_ref::<AuthError>().is_some() {
                return Self::AuthFailed;
            }
        }
        Self::Error
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let default = if verbose { "atmwatch=debug,info" } else { "atmwatch=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Some(Commands::Run(args)) => run::run(args, &cli).await,
        Some(Commands::Check) => check::run(&cli).await,
        Some(Commands::Summary(args)) => summary::run(args, &cli).await,
        Some(Commands::History(args)) => history::run(args, &cli).await,
        None => run::run(&cli.run, &cli).await,
    };

    let code = match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::for_error(&e)
        }
    };

    std::process::exit(code as i32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_auth_failure() {
        let err = anyhow::Error::new(FetchError::Auth(AuthError::AuthenticationFailed(
            "both credentials rejected".into(),
        )));
        assert_eq!(ExitCode::for_error(&err), ExitCode::AuthFailed);
    }

    #[test]
    fn test_exit_code_run_failure_through_context() {
        let err = anyhow::Error::new(FetchError::RunFailed("none of 3 batches succeeded".into()))
            .context("retrieval run");
        assert_eq!(ExitCode::for_error(&err), ExitCode::RunFailed);
    }

    #[test]
    fn test_exit_code_other_errors() {
        let err = anyhow::anyhow!("config missing");
        assert_eq!(ExitCode::for_error(&err), ExitCode::Error);
        let err = anyhow::Error::new(FetchError::MalformedResponse("bad".into()));
        assert_eq!(ExitCode::for_error(&err), ExitCode::Error);
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "atmwatch",
            "run",
            "--demo",
            "--batch-size",
            "5",
            "--terminals",
            "T1,T2",
            "--format",
            "json",
        ]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Some(Commands::Run(args)) => {
                assert!(args.demo);
                assert_eq!(args.batch_size, Some(5));
                assert_eq!(args.terminals, vec!["T1".to_string(), "T2".to_string()]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_default_run_flags() {
        let cli = Cli::try_parse_from([
            "atmwatch",
            "--demo",
            "--batch-size",
            "5",
            "--delay",
            "0",
            "--max-batches",
            "2",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.demo);
        assert_eq!(cli.run.batch_size, Some(5));
        assert_eq!(cli.run.delay, Some(0));
        assert_eq!(cli.run.max_batches, Some(2));
    }

    #[test]
    fn test_cli_without_flags_uses_defaults() {
        let cli = Cli::try_parse_from(["atmwatch", "--verbose"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.run.demo);
        assert!(cli.run.batch_size.is_none());
        assert!(cli.verbose);
    }
}
