//! Fetch context shared by the pipeline stages.
//!
//! The fetch context bundles the collaborators a run needs: the
//! authenticator, the terminal source, and (in live mode) the upstream
//! client used by the connectivity probe.

use std::sync::Arc;
use std::time::Duration;

use atmwatch_core::Credential;
use tracing::warn;

use crate::auth::{Authenticator, LoginTransport};
use crate::client::UpstreamClient;
use crate::demo::DemoSource;
use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::source::{HttpTerminalSource, TerminalSource};

// ============================================================================
// Run Mode
// ============================================================================

/// Whether a run talks to the upstream or synthesizes data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Talk to the upstream.
    #[default]
    Live,
    /// Bypass the network entirely.
    Demo,
}

impl RunMode {
    /// Returns true for demo mode.
    pub fn is_demo(&self) -> bool {
        matches!(self, Self::Demo)
    }
}

// ============================================================================
// Fetch Settings
// ============================================================================

/// Settings for fetch operations.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// TCP/TLS connect timeout per request.
    pub connect_timeout: Duration,
    /// Idle read timeout per request. Resets whenever data arrives.
    pub read_timeout: Duration,
    /// Skip certificate verification (upstream constraint).
    pub accept_invalid_certs: bool,
    /// Concurrent fetch workers per batch.
    pub max_workers: usize,
    /// Retries beyond the first attempt, per request.
    pub max_retries: u32,
    /// Base delay for retry backoff.
    pub retry_base_delay: Duration,
    /// Cap on retry backoff.
    pub retry_max_delay: Duration,
    /// Wall-clock bound on one batch.
    pub batch_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            accept_invalid_certs: true,
            max_workers: 4,
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(300),
        }
    }
}

impl FetchSettings {
    /// Returns the retry policy for a single request.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries.saturating_add(1))
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
    }

    /// Sets the worker count.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Sets the retry cap.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the retry base delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Sets the batch timeout.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }
}

// ============================================================================
// Fetch Context
// ============================================================================

/// Collaborators for one pipeline run.
pub struct FetchContext {
    /// Session lifecycle.
    pub authenticator: Arc<Authenticator>,
    /// Where terminals and their details come from.
    pub source: Arc<dyn TerminalSource>,
    /// Upstream client, present in live mode.
    pub client: Option<Arc<UpstreamClient>>,
    /// Live or demo.
    pub mode: RunMode,
    /// Fetch settings.
    pub settings: FetchSettings,
}

impl FetchContext {
    /// Creates a live context talking to `base_url`.
    pub fn live(
        base_url: &str,
        primary: Credential,
        fallback: Credential,
        settings: FetchSettings,
    ) -> Result<Self, FetchError> {
        if !settings.accept_invalid_certs {
            warn!("Certificate verification enabled; the upstream usually serves self-signed certificates");
        }

        let client = Arc::new(UpstreamClient::new(base_url, &settings)?);
        let transport: Arc<dyn LoginTransport> = client.clone();
        let authenticator =
            Authenticator::new(transport, primary, fallback).with_retry(settings.retry_policy());
        let source = HttpTerminalSource::new(client.clone());

        Ok(Self {
            authenticator: Arc::new(authenticator),
            source: Arc::new(source),
            client: Some(client),
            mode: RunMode::Live,
            settings,
        })
    }

    /// Creates a demo context with `terminal_count` synthetic terminals.
    pub fn demo(terminal_count: usize, settings: FetchSettings) -> Self {
        Self {
            authenticator: Arc::new(Authenticator::demo()),
            source: Arc::new(DemoSource::new(terminal_count)),
            client: None,
            mode: RunMode::Demo,
            settings,
        }
    }

    /// Creates a builder for customizing the context.
    pub fn builder() -> FetchContextBuilder {
        FetchContextBuilder::new()
    }
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("source", &self.source.name())
            .field("mode", &self.mode)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Fetch Context Builder
// ============================================================================

/// Builder for constructing a `FetchContext` from arbitrary collaborators.
pub struct FetchContextBuilder {
    authenticator: Option<Arc<Authenticator>>,
    source: Option<Arc<dyn TerminalSource>>,
    client: Option<Arc<UpstreamClient>>,
    mode: RunMode,
    settings: FetchSettings,
}

impl FetchContextBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            authenticator: None,
            source: None,
            client: None,
            mode: RunMode::Live,
            settings: FetchSettings::default(),
        }
    }

    /// Sets the authenticator.
    pub fn authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Sets the terminal source.
    pub fn source(mut self, source: Arc<dyn TerminalSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the upstream client used for the connectivity probe.
    pub fn client(mut self, client: Arc<UpstreamClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the run mode.
    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the fetch settings.
    pub fn settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the context. Missing collaborators fall back to demo ones.
    pub fn build(self) -> FetchContext {
        FetchContext {
            authenticator: self
                .authenticator
                .unwrap_or_else(|| Arc::new(Authenticator::demo())),
            source: self
                .source
                .unwrap_or_else(|| Arc::new(DemoSource::default())),
            client: self.client,
            mode: self.mode,
            settings: self.settings,
        }
    }
}

impl Default for FetchContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
