//! Check command - probe, log in, log out.

use anyhow::Result;
use atmwatch_core::CredentialRole;
use atmwatch_fetch::{AuthError, FetchContext, FetchError, LoginAttempt, Probe, ProbeResult};
use atmwatch_store::AppConfig;
use tracing::info;

use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// What a check found.
#[derive(Debug)]
pub struct CheckReport {
    /// Upstream base URL, empty in demo mode.
    pub base_url: String,
    /// Whether the check ran against the demo source.
    pub demo: bool,
    /// Connectivity probe, skipped in demo mode.
    pub probe: Option<ProbeResult>,
    /// Login attempts in order.
    pub attempts: Vec<LoginAttempt>,
    /// Credential that logged in.
    pub role: Option<CredentialRole>,
    /// Why authentication failed.
    pub error: Option<AuthError>,
}

impl CheckReport {
    /// Returns true if a session was obtained.
    pub fn authenticated(&self) -> bool {
        self.role.is_some()
    }
}

/// Runs the check command.
pub async fn run(cli: &Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let mut report = execute(&config).await?;

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_check(&report));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_check(&report)?);
        }
    }

    match report.error.take() {
        Some(err) => Err(FetchError::Auth(err).into()),
        None => Ok(()),
    }
}

/// Probes the upstream, authenticates, and logs out again.
pub async fn execute(config: &AppConfig) -> Result<CheckReport> {
    let settings = config.fetch_settings();
    let demo = config.retrieval.demo_mode;

    let ctx = if demo {
        FetchContext::demo(0, settings.clone())
    } else {
        config.validate_live()?;
        FetchContext::live(
            &config.upstream.base_url,
            config.primary_credential(),
            config.fallback_credential(),
            settings.clone(),
        )?
    };

    let probe = match &ctx.client {
        Some(client) => Some(
            Probe::new()
                .with_timeout(settings.connect_timeout)
                .with_retry(settings.retry_policy())
                .check(client)
                .await,
        ),
        None => None,
    };

    let outcome = ctx.authenticator.authenticate_with_attempts().await;
    let role = outcome.result.as_ref().ok().map(|session| session.role);
    if let Some(role) = role {
        info!(role = %role, "Credentials accepted");
    }
    ctx.authenticator.logout(outcome.result.as_ref().ok()).await;

    Ok(CheckReport {
        base_url: config.upstream.base_url.clone(),
        demo,
        probe,
        attempts: outcome.attempts,
        role,
        error: outcome.result.err(),
    })
}
