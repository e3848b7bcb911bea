//! Concurrent terminal fetcher.
//!
//! One task per terminal, at most `max_workers` in flight. Workers report
//! back over a per-batch channel; the controlling task is the only place
//! results are collected, so nothing is shared mutably between workers.
//!
//! A terminal whose fetch fails (after retries) becomes a failure-marked
//! placeholder. Only a broken worker pool fails the whole call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atmwatch_core::{Batch, Session, Terminal, TerminalDetail};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::context::FetchSettings;
use crate::error::FetchError;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::source::TerminalSource;

/// Failure reason for terminals still in flight when a batch times out.
pub const BATCH_TIMEOUT_REASON: &str = "batch timeout";

// ============================================================================
// Fetch Report
// ============================================================================

/// What one batch fetch produced.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// One record per requested terminal, successes and placeholders alike.
    pub details: Vec<TerminalDetail>,
    /// Retries performed across all terminals.
    pub retries: u64,
    /// At least one request was rejected for an expired token.
    pub token_expired: bool,
    /// The batch deadline passed before every terminal finished.
    pub timed_out: bool,
}

impl FetchReport {
    /// Returns the number of successful records.
    pub fn successes(&self) -> usize {
        self.details.iter().filter(|d| d.is_success()).count()
    }

    /// Returns the number of failure placeholders.
    pub fn failures(&self) -> usize {
        self.details.len() - self.successes()
    }
}

// ============================================================================
// Batch Fetcher Trait
// ============================================================================

/// Fetches every terminal of a batch.
#[async_trait]
pub trait BatchFetcher: Send + Sync {
    /// Fetches `batch` using `session`.
    ///
    /// Returns `Err` only when the batch could not be fetched at all.
    async fn fetch_batch(&self, session: &Session, batch: &Batch) -> Result<FetchReport, FetchError>;
}

// ============================================================================
// Terminal Fetcher
// ============================================================================

struct WorkerMessage {
    index: usize,
    outcome: RetryOutcome<TerminalDetail>,
}

/// Bounded-concurrency fetcher over a [`TerminalSource`].
pub struct TerminalFetcher {
    source: Arc<dyn TerminalSource>,
    retry: RetryPolicy,
    max_workers: usize,
    batch_timeout: Duration,
}

impl TerminalFetcher {
    /// Creates a fetcher using the worker, retry and timeout settings.
    pub fn new(source: Arc<dyn TerminalSource>, settings: &FetchSettings) -> Self {
        Self {
            source,
            retry: settings.retry_policy(),
            max_workers: settings.max_workers,
            batch_timeout: settings.batch_timeout,
        }
    }

    /// Fetches details for `terminals`, at most `max_workers` at a time.
    ///
    /// The returned details line up with `terminals`.
    #[instrument(skip_all, fields(terminals = terminals.len(), workers = self.max_workers))]
    pub async fn fetch_details(
        &self,
        session: &Session,
        terminals: &[Terminal],
    ) -> Result<FetchReport, FetchError> {
        if self.max_workers == 0 {
            return Err(FetchError::InvalidRequest(
                "worker pool needs at least one worker".to_string(),
            ));
        }
        if terminals.is_empty() {
            return Ok(FetchReport::default());
        }

        let session = Arc::new(session.clone());
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let (tx, mut rx) = mpsc::channel(terminals.len());
        let mut workers = JoinSet::new();

        for (index, terminal) in terminals.iter().cloned().enumerate() {
            let tx = tx.clone();
            let source = Arc::clone(&self.source);
            let session = Arc::clone(&session);
            let permits = Arc::clone(&permits);
            let retry = self.retry.clone();

            workers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let source = source.as_ref();
                let session = session.as_ref();
                let terminal = &terminal;

                let outcome = retry
                    .execute(move || source.fetch_detail(session, terminal))
                    .await;
                // The receiver is gone only after a timeout; nothing to report then.
                let _ = tx.send(WorkerMessage { index, outcome }).await;
            });
        }
        drop(tx);

        let mut collector = Collector::new(terminals);
        let deadline = Instant::now() + self.batch_timeout;

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => collector.absorb(message),
                    None => break,
                },
                () = tokio::time::sleep_until(deadline) => {
                    collector.timed_out = true;
                    warn!(
                        timeout = ?self.batch_timeout,
                        pending = collector.pending(),
                        "Batch deadline reached, abandoning in-flight fetches"
                    );
                    workers.abort_all();
                    break;
                }
            }
        }

        // Results that arrived between the deadline and the abort.
        while let Ok(message) = rx.try_recv() {
            collector.absorb(message);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                if error.is_panic() {
                    warn!(error = %error, "Fetch worker panicked");
                }
            }
        }

        let report = collector.finish();
        info!(
            successes = report.successes(),
            failures = report.failures(),
            retries = report.retries,
            "Fetch complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl BatchFetcher for TerminalFetcher {
    async fn fetch_batch(&self, session: &Session, batch: &Batch) -> Result<FetchReport, FetchError> {
        debug!(batch = batch.number, size = batch.len(), "Fetching batch");
        self.fetch_details(session, &batch.terminals).await
    }
}

impl std::fmt::Debug for TerminalFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalFetcher")
            .field("source", &self.source.name())
            .field("max_workers", &self.max_workers)
            .field("batch_timeout", &self.batch_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Gathers worker messages on the controlling task.
struct Collector<'a> {
    terminals: &'a [Terminal],
    slots: Vec<Option<TerminalDetail>>,
    retries: u64,
    token_expired: bool,
    timed_out: bool,
}

impl<'a> Collector<'a> {
    fn new(terminals: &'a [Terminal]) -> Self {
        Self {
            terminals,
            slots: vec![None; terminals.len()],
            retries: 0,
            token_expired: false,
            timed_out: false,
        }
    }

    fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    fn absorb(&mut self, message: WorkerMessage) {
        let WorkerMessage { index, outcome } = message;
        let terminal = &self.terminals[index];
        self.retries += u64::from(outcome.retries());

        let detail = match outcome.result {
            Ok(detail) => detail,
            Err(error) => {
                if matches!(error, FetchError::TokenExpired) {
                    self.token_expired = true;
                }
                warn!(
                    terminal_id = %terminal.terminal_id,
                    attempts = outcome.attempts,
                    error = %error,
                    "Terminal fetch failed"
                );
                TerminalDetail::failed(terminal, error.to_string())
            }
        };
        self.slots[index] = Some(detail);
    }

    fn finish(self) -> FetchReport {
        let reason = if self.timed_out {
            BATCH_TIMEOUT_REASON
        } else {
            "worker exited without a result"
        };

        let details = self
            .slots
            .into_iter()
            .zip(self.terminals)
            .map(|(slot, terminal)| {
                slot.unwrap_or_else(|| TerminalDetail::failed(terminal, reason))
            })
            .collect();

        FetchReport {
            details,
            retries: self.retries,
            token_expired: self.token_expired,
            timed_out: self.timed_out,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
