//! Terminal sources.
//!
//! A [`TerminalSource`] answers two questions for a session: which terminals
//! exist for a status filter, and what one terminal's detail looks like.
//! The live implementation talks to the upstream; the demo implementation
//! lives in [`crate::demo`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use atmwatch_core::{Session, Terminal, TerminalDetail};
use tracing::{info, instrument, warn};

use crate::client::UpstreamClient;
use crate::error::FetchError;
use crate::parser::{parse_search_results, parse_terminal_detail};
use crate::retry::RetryPolicy;

// ============================================================================
// Terminal Source Trait
// ============================================================================

/// Where terminals and their details come from.
#[async_trait]
pub trait TerminalSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Lists terminals matching one upstream status filter.
    async fn search(&self, session: &Session, status_filter: &str)
    -> Result<Vec<Terminal>, FetchError>;

    /// Fetches and parses one terminal's detail.
    async fn fetch_detail(
        &self,
        session: &Session,
        terminal: &Terminal,
    ) -> Result<TerminalDetail, FetchError>;
}

// ============================================================================
// HTTP Source
// ============================================================================

/// Live source backed by the upstream API.
#[derive(Debug, Clone)]
pub struct HttpTerminalSource {
    client: Arc<UpstreamClient>,
}

impl HttpTerminalSource {
    /// Creates a source using `client`.
    pub fn new(client: Arc<UpstreamClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TerminalSource for HttpTerminalSource {
    fn name(&self) -> &str {
        "upstream"
    }

    async fn search(
        &self,
        session: &Session,
        status_filter: &str,
    ) -> Result<Vec<Terminal>, FetchError> {
        let payload = self.client.dashboard_search(session, status_filter).await?;
        parse_search_results(&payload)
    }

    async fn fetch_detail(
        &self,
        session: &Session,
        terminal: &Terminal,
    ) -> Result<TerminalDetail, FetchError> {
        let payload = self.client.terminal_detail(session, terminal).await?;
        parse_terminal_detail(terminal, payload)
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// What discovery found, plus the retries its searches took.
#[derive(Debug)]
pub struct Discovery {
    /// Merged terminals, or the last error when every search failed.
    pub result: Result<Vec<Terminal>, FetchError>,
    /// Retries performed across all searches.
    pub retries: u64,
}

/// Discovers the terminal universe by searching each status filter.
///
/// Results are merged by terminal id; the first occurrence wins and order
/// is preserved. A filter whose search fails is skipped, but if every
/// search fails the last error is returned.
#[instrument(skip(source, session, retry), fields(source_name = source.name()))]
pub async fn discover_terminals(
    source: &dyn TerminalSource,
    session: &Session,
    status_filters: &[String],
    retry: &RetryPolicy,
) -> Discovery {
    let mut seen = HashSet::new();
    let mut terminals = Vec::new();
    let mut last_error = None;
    let mut searched = 0usize;
    let mut retries = 0u64;

    for filter in status_filters {
        let outcome = retry
            .execute(move || source.search(session, filter.as_str()))
            .await;
        retries += u64::from(outcome.retries());

        match outcome.result {
            Ok(found) => {
                searched += 1;
                let before = terminals.len();
                for terminal in found {
                    if seen.insert(terminal.terminal_id.clone()) {
                        terminals.push(terminal);
                    }
                }
                info!(filter = %filter, added = terminals.len() - before, "Search complete");
            }
            Err(error) => {
                warn!(filter = %filter, error = %error, "Search failed");
                last_error = Some(error);
            }
        }
    }

    let result = match last_error {
        Some(error) if searched == 0 => Err(error),
        _ => Ok(terminals),
    };
    Discovery { result, retries }
}

// ============================================================================
// Tests
// ============================================================================
