//! Configuration management.
//!
//! One JSON file with three sections. Missing file or missing fields fall
//! back to defaults; credentials may come from the environment instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use atmwatch_core::{Credential, DEFAULT_STATUS_FILTERS};
use atmwatch_fetch::{FetchSettings, PipelineSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persistence::{default_archive_dir, default_config_path, default_database_path};

/// Upper bound on `retrieval.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Environment variable names for credential overrides.
pub const ENV_PRIMARY_USERNAME: &str = "ATMWATCH_PRIMARY_USERNAME";
/// See [`ENV_PRIMARY_USERNAME`].
pub const ENV_PRIMARY_PASSWORD: &str = "ATMWATCH_PRIMARY_PASSWORD";
/// See [`ENV_PRIMARY_USERNAME`].
pub const ENV_FALLBACK_USERNAME: &str = "ATMWATCH_FALLBACK_USERNAME";
/// See [`ENV_PRIMARY_USERNAME`].
pub const ENV_FALLBACK_PASSWORD: &str = "ATMWATCH_FALLBACK_PASSWORD";

// ============================================================================
// Sections
// ============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream endpoint and credentials.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Batching, concurrency and timeouts.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Output locations.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// A username/password pair as written in the config file.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Login username.
    #[serde(default)]
    pub username: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl From<&CredentialConfig> for Credential {
    fn from(c: &CredentialConfig) -> Self {
        Credential::new(c.username.clone(), c.password.clone())
    }
}

/// Upstream section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the monitoring API.
    #[serde(default)]
    pub base_url: String,
    /// Primary credential.
    #[serde(default)]
    pub primary: CredentialConfig,
    /// Fallback credential.
    #[serde(default)]
    pub fallback: CredentialConfig,
    /// Skip certificate verification.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Dashboard-search filters used for discovery.
    #[serde(default = "default_status_filters")]
    pub status_filters: Vec<String>,
}

/// Retrieval section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Terminals per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds between batches.
    #[serde(default = "default_delay")]
    pub delay: u64,
    /// Concurrent fetch workers per batch.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Retries beyond the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry backoff in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Retry backoff cap in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Batch wall-clock bound in seconds.
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout: u64,
    /// Stop after this many batches.
    #[serde(default)]
    pub max_batches: Option<usize>,
    /// Run against the offline demo source.
    #[serde(default)]
    pub demo_mode: bool,
}

/// Storage section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Directory for per-run JSON archives.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Write the JSON archive in addition to the database.
    #[serde(default = "default_true")]
    pub archive_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_status_filters() -> Vec<String> {
    DEFAULT_STATUS_FILTERS.iter().map(|s| (*s).to_string()).collect()
}

fn default_batch_size() -> usize {
    50
}

fn default_delay() -> u64 {
    5
}

fn default_max_workers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_batch_timeout() -> u64 {
    300
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            primary: CredentialConfig::default(),
            fallback: CredentialConfig::default(),
            accept_invalid_certs: true,
            status_filters: default_status_filters(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay: default_delay(),
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            batch_timeout: default_batch_timeout(),
            max_batches: None,
            demo_mode: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            archive_dir: default_archive_dir(),
            archive_enabled: true,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        default_config_path()
    }

    /// Loads configuration from `path`, or the default path when `None`,
    /// then applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, StoreError> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a specific path without overrides.
    pub fn load_from(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Applies credential overrides from a variable lookup.
    ///
    /// Non-empty values replace whatever the file held.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let apply = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                debug!(variable = key, "Credential override from environment");
                *target = value;
            }
        };

        apply(ENV_PRIMARY_USERNAME, &mut self.upstream.primary.username);
        apply(ENV_PRIMARY_PASSWORD, &mut self.upstream.primary.password);
        apply(ENV_FALLBACK_USERNAME, &mut self.upstream.fallback.username);
        apply(ENV_FALLBACK_PASSWORD, &mut self.upstream.fallback.password);
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), StoreError> {
        let r = &self.retrieval;
        if r.batch_size == 0 {
            return Err(StoreError::Config("retrieval.batch_size must be at least 1".into()));
        }
        if r.max_workers == 0 {
            return Err(StoreError::Config("retrieval.max_workers must be at least 1".into()));
        }
        if r.max_retries > MAX_RETRIES_LIMIT {
            return Err(StoreError::Config(format!(
                "retrieval.max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                r.max_retries
            )));
        }
        if r.max_batches == Some(0) {
            return Err(StoreError::Config("retrieval.max_batches must be at least 1".into()));
        }
        Ok(())
    }

    /// Checks what a live run needs on top of [`Self::validate`].
    pub fn validate_live(&self) -> Result<(), StoreError> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(StoreError::Config("upstream.base_url is not set".into()));
        }
        Ok(())
    }

    /// Primary credential.
    pub fn primary_credential(&self) -> Credential {
        Credential::from(&self.upstream.primary)
    }

    /// Fallback credential.
    pub fn fallback_credential(&self) -> Credential {
        Credential::from(&self.upstream.fallback)
    }

    /// Builds fetch settings from the retrieval and upstream sections.
    pub fn fetch_settings(&self) -> FetchSettings {
        let r = &self.retrieval;
        FetchSettings {
            connect_timeout: Duration::from_secs(r.connect_timeout),
            read_timeout: Duration::from_secs(r.read_timeout),
            accept_invalid_certs: self.upstream.accept_invalid_certs,
            max_workers: r.max_workers,
            max_retries: r.max_retries,
            retry_base_delay: Duration::from_millis(r.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(r.retry_max_delay_ms),
            batch_timeout: Duration::from_secs(r.batch_timeout),
        }
    }

    /// Builds pipeline settings from the retrieval and upstream sections.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let r = &self.retrieval;
        PipelineSettings {
            batch_size: r.batch_size,
            inter_batch_delay: Duration::from_secs(r.delay),
            max_batches: r.max_batches,
            status_filters: self.upstream.status_filters.clone(),
            connectivity_check: !r.demo_mode,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
