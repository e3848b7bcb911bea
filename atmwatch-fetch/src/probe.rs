//! Connectivity probe.
//!
//! A bounded GET against the upstream base URL, retried like every other
//! upstream request. Any HTTP answer below 500 means the upstream is
//! reachable; authentication decides the rest.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::client::UpstreamClient;
use crate::error::FetchError;
use crate::retry::RetryPolicy;

/// Result of a probe check.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Whether the upstream answered.
    pub success: bool,
    /// Response time in milliseconds, retries included.
    pub response_time_ms: u64,
    /// HTTP status, if a response arrived.
    pub status_code: Option<u16>,
    /// Transport error, if any.
    pub error: Option<String>,
    /// Requests sent (at least 1).
    pub attempts: u32,
}

impl ProbeResult {
    /// Returns the retries performed.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Reachability check for the upstream.
#[derive(Debug, Clone)]
pub struct Probe {
    /// Request timeout.
    pub timeout: Duration,
    retry: RetryPolicy,
}

impl Probe {
    /// Creates a single-shot probe with a 10 second timeout.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::no_retry(),
        }
    }

    /// Sets the timeout for this probe.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy. Server errors and transport failures are retried.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Executes the probe against the client's base URL.
    pub async fn check(&self, client: &UpstreamClient) -> ProbeResult {
        let start = Instant::now();
        let url = client.base_url();
        let timeout = self.timeout;

        debug!(url = %url, "Running connectivity probe");

        let outcome = self
            .retry
            .execute(move || async move {
                let response = client.inner().get(url.clone()).timeout(timeout).send().await?;
                let status = response.status();
                if status.is_server_error() {
                    return Err(FetchError::from_status(
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("server error"),
                    ));
                }
                Ok(status.as_u16())
            })
            .await;
        let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let attempts = outcome.attempts;

        match outcome.result {
            Ok(code) => {
                info!(status = code, response_time_ms, attempts, "Upstream reachable");
                ProbeResult {
                    success: true,
                    response_time_ms,
                    status_code: Some(code),
                    error: None,
                    attempts,
                }
            }
            Err(FetchError::Status { code, message }) => {
                warn!(status = code, attempts, "Upstream answered with a server error");
                ProbeResult {
                    success: false,
                    response_time_ms,
                    status_code: Some(code),
                    error: Some(message),
                    attempts,
                }
            }
            Err(e) => {
                warn!(error = %e, attempts, "Upstream unreachable");
                ProbeResult {
                    success: false,
                    response_time_ms,
                    status_code: None,
                    error: Some(e.to_string()),
                    attempts,
                }
            }
        }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::new()
    }
}
