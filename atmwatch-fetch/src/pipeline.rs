//! Batch orchestrator.
//!
//! Runs one end-to-end retrieval: probe, login, discovery, sequential
//! batches, combine, persist, logout. Batches never overlap. Each batch is
//! persisted on its own as soon as it finishes, so an interrupted run keeps
//! every batch already written.
//!
//! Only authentication failure and "no batch succeeded" fail the run;
//! terminal- and batch-level failures are recorded and the run continues.

use std::sync::Arc;
use std::time::Duration;

use atmwatch_core::{
    Batch, BatchResult, CombinedResult, CredentialRole, DEFAULT_STATUS_FILTERS, ExecutionLogger,
    ExecutionRecord, Phase, ResultSink, RunSummary, Session, Terminal, TerminalOutcome, combine,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::client::UpstreamClient;
use crate::context::FetchContext;
use crate::error::FetchError;
use crate::fetcher::{BatchFetcher, TerminalFetcher};
use crate::probe::{Probe, ProbeResult};
use crate::retry::RetryPolicy;
use crate::source::{TerminalSource, discover_terminals};

// ============================================================================
// Pipeline Settings
// ============================================================================

/// Settings for the batch loop.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Terminals per batch.
    pub batch_size: usize,
    /// Pause between batches. Skipped after the last one.
    pub inter_batch_delay: Duration,
    /// Stop after this many batches.
    pub max_batches: Option<usize>,
    /// Dashboard-search filters used for discovery.
    pub status_filters: Vec<String>,
    /// Probe the upstream before logging in.
    pub connectivity_check: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            inter_batch_delay: Duration::from_secs(5),
            max_batches: None,
            status_filters: DEFAULT_STATUS_FILTERS.iter().map(|s| (*s).to_string()).collect(),
            connectivity_check: true,
        }
    }
}

impl PipelineSettings {
    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the inter-batch delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    /// Caps the number of batches.
    pub fn with_max_batches(mut self, max_batches: Option<usize>) -> Self {
        self.max_batches = max_batches;
        self
    }
}

// ============================================================================
// Reports
// ============================================================================

/// One line of the per-batch summary.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// 1-based batch number.
    pub batch_number: u32,
    /// Terminals in the batch.
    pub requested: usize,
    /// Terminals retrieved.
    pub successful: usize,
    /// Terminals that failed.
    pub failed: usize,
    /// Retries performed.
    pub retries: u64,
    /// Whether the batch deadline passed.
    pub timed_out: bool,
    /// Batch-level failure, if any.
    pub error: Option<String>,
    /// Whether the batch write succeeded.
    pub persisted: bool,
    /// Wall-clock duration.
    pub duration_ms: i64,
}

impl BatchSummary {
    fn from_result(result: &BatchResult, persisted: bool) -> Self {
        Self {
            batch_number: result.batch_number,
            requested: result.metadata.total_terminals,
            successful: result.metadata.successful_retrievals,
            failed: result.metadata.failed_retrievals,
            retries: result.metadata.retries_performed,
            timed_out: result.timed_out,
            error: result.error.clone(),
            persisted,
            duration_ms: (result.finished_at - result.started_at).num_milliseconds(),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    /// The finalized execution record.
    pub execution: ExecutionRecord,
    /// The combined dataset.
    pub combined: CombinedResult,
    /// Per-batch summaries, in batch order.
    pub batches: Vec<BatchSummary>,
    /// Connectivity probe result, when one ran.
    pub probe: Option<ProbeResult>,
    /// Which credential the run logged in with.
    pub role: CredentialRole,
}

impl RunReport {
    /// Returns true if at least one batch succeeded.
    pub fn has_successful_batch(&self) -> bool {
        self.combined.has_successful_batch()
    }

    /// Converts a run with zero successful batches into [`FetchError::RunFailed`].
    pub fn into_result(self) -> Result<Self, FetchError> {
        if self.has_successful_batch() {
            Ok(self)
        } else {
            Err(FetchError::RunFailed(format!(
                "none of {} batches succeeded",
                self.combined.total_batches
            )))
        }
    }
}

/// Batch loop output.
struct Retrieval {
    results: Vec<BatchResult>,
    summaries: Vec<BatchSummary>,
    writes_ok: bool,
    /// Retries spent on re-authentication.
    login_retries: u64,
}

// ============================================================================
// Batch Orchestrator
// ============================================================================

/// Sequences batches over a fetcher and persists every partial result.
pub struct BatchOrchestrator {
    authenticator: Arc<Authenticator>,
    source: Arc<dyn TerminalSource>,
    fetcher: Arc<dyn BatchFetcher>,
    sink: Arc<dyn ResultSink>,
    client: Option<Arc<UpstreamClient>>,
    retry: RetryPolicy,
    probe_timeout: Duration,
    settings: PipelineSettings,
}

impl BatchOrchestrator {
    /// Creates an orchestrator over the collaborators in `ctx`.
    pub fn new(ctx: &FetchContext, sink: Arc<dyn ResultSink>, settings: PipelineSettings) -> Self {
        let fetcher = TerminalFetcher::new(Arc::clone(&ctx.source), &ctx.settings);
        Self {
            authenticator: Arc::clone(&ctx.authenticator),
            source: Arc::clone(&ctx.source),
            fetcher: Arc::new(fetcher),
            sink,
            client: ctx.client.clone(),
            retry: ctx.settings.retry_policy(),
            probe_timeout: ctx.settings.connect_timeout,
            settings,
        }
    }

    /// Replaces the batch fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn BatchFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Returns the pipeline settings.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs the whole pipeline.
    ///
    /// With `terminals` set, discovery is skipped and exactly those
    /// terminals are fetched. Returns `Err` only when authentication fails;
    /// use [`RunReport::into_result`] to treat a run with no successful
    /// batch as a failure.
    #[instrument(skip_all, fields(explicit_terminals = terminals.as_ref().map(Vec::len)))]
    pub async fn run(&self, terminals: Option<Vec<Terminal>>) -> Result<RunReport, FetchError> {
        let mut logger = ExecutionLogger::new();
        let record = logger.start_run();
        let execution_id = record.execution_id;
        self.persist_execution(&record).await;

        // Retries outside per-terminal fetches: probe, logins, discovery, logout.
        let mut request_retries = 0u64;

        let probe = match (&self.client, self.settings.connectivity_check) {
            (Some(client), true) => {
                logger.mark_phase(Phase::ConnectivityCheck);
                let result = Probe::new()
                    .with_timeout(self.probe_timeout)
                    .with_retry(self.retry.clone())
                    .check(client)
                    .await;
                request_retries += u64::from(result.retries());
                if !result.success {
                    warn!("Connectivity probe failed, continuing to authentication");
                }
                Some(result)
            }
            _ => None,
        };

        logger.mark_phase(Phase::Authentication);
        let login = self.authenticator.authenticate_with_attempts().await;
        request_retries += login.retries();
        let mut session = match login.result {
            Ok(session) => session,
            Err(error) => {
                warn!(error = %error, "Authentication failed, aborting run");
                self.abort(&mut logger, &error.to_string(), request_retries).await;
                return Err(error.into());
            }
        };
        let role = session.role;

        let terminals = match terminals {
            Some(terminals) => terminals,
            None => {
                logger.mark_phase(Phase::Discovery);
                let discovery = discover_terminals(
                    self.source.as_ref(),
                    &session,
                    &self.settings.status_filters,
                    &self.retry,
                )
                .await;
                request_retries += discovery.retries;
                match discovery.result {
                    Ok(found) => found,
                    Err(error) => {
                        warn!(error = %error, "Terminal discovery failed");
                        Vec::new()
                    }
                }
            }
        };
        info!(terminals = terminals.len(), "Terminal universe ready");

        logger.mark_phase(Phase::BatchRetrieval);
        let retrieval = self
            .retrieve(&mut session, &terminals, &mut logger, execution_id)
            .await;

        logger.mark_phase(Phase::Combine);
        let combined = combine(&retrieval.results);

        logger.mark_phase(Phase::Persist);
        let combined_written = match self.sink.write_combined(execution_id, &combined).await {
            Ok(()) => true,
            Err(error) => {
                warn!(sink = self.sink.name(), error = %error, "Failed to persist combined result");
                false
            }
        };

        logger.mark_phase(Phase::Logout);
        request_retries += u64::from(self.authenticator.logout(Some(&session)).await);
        request_retries += retrieval.login_retries;

        let mut summary = RunSummary::from_combined(&combined, combined_written && retrieval.writes_ok);
        summary.retries_performed += request_retries;
        if !combined.has_successful_batch() {
            summary.error = Some("no batch succeeded".to_string());
        }
        let execution = logger.finish_run(summary)?;
        self.persist_execution(&execution).await;

        info!(
            execution_id = %execution_id,
            total = combined.total_terminals(),
            successful = combined.metadata.successful_retrievals,
            success_rate = combined.success_rate(),
            batches = combined.total_batches,
            failed_batches = combined.failed_batches.len(),
            "Run complete"
        );

        Ok(RunReport {
            execution,
            combined,
            batches: retrieval.summaries,
            probe,
            role,
        })
    }

    /// Fetches `terminals` batch by batch.
    async fn retrieve(
        &self,
        session: &mut Session,
        terminals: &[Terminal],
        logger: &mut ExecutionLogger,
        execution_id: Uuid,
    ) -> Retrieval {
        let mut batches = Batch::partition(terminals, self.settings.batch_size);
        if let Some(cap) = self.settings.max_batches {
            if batches.len() > cap {
                info!(planned = batches.len(), cap, "Capping batch count");
                batches.truncate(cap);
            }
        }

        let total = batches.len();
        let mut retrieval = Retrieval {
            results: Vec::with_capacity(total),
            summaries: Vec::with_capacity(total),
            writes_ok: true,
            login_retries: 0,
        };
        let mut needs_refresh = false;
        let mut session_lost: Option<String> = None;

        for (index, batch) in batches.iter().enumerate() {
            let started_at = Utc::now();
            let mut refreshes = 0u32;

            if needs_refresh && session_lost.is_none() {
                let login = self.authenticator.refresh_with_attempts().await;
                retrieval.login_retries += login.retries();
                match login.result {
                    Ok(fresh) => {
                        *session = fresh;
                        refreshes = 1;
                    }
                    Err(error) => {
                        warn!(error = %error, "Re-authentication failed, skipping remaining batches");
                        session_lost = Some(format!("re-authentication failed: {error}"));
                    }
                }
            }

            let (mut result, token_expired) = match &session_lost {
                Some(reason) => (
                    BatchResult::failed(batch.number, batch.len(), reason, started_at),
                    false,
                ),
                None => self.fetch_batch(session, batch, started_at).await,
            };
            result.metadata.token_refreshes = refreshes;
            needs_refresh = token_expired;

            for detail in &result.details {
                logger.record_terminal_outcome(&detail.terminal_id, &TerminalOutcome::of(detail));
            }
            if let Some(reason) = &result.error {
                let outcome = TerminalOutcome::Failure(reason.clone());
                for terminal in &batch.terminals {
                    logger.record_terminal_outcome(&terminal.terminal_id, &outcome);
                }
            }

            let persisted = match self.sink.write_batch(execution_id, &result).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(batch = batch.number, error = %error, "Failed to persist batch");
                    retrieval.writes_ok = false;
                    false
                }
            };

            let summary = BatchSummary::from_result(&result, persisted);
            info!(
                batch = summary.batch_number,
                of = total,
                successful = summary.successful,
                failed = summary.failed,
                retries = summary.retries,
                timed_out = summary.timed_out,
                "Batch finished"
            );
            retrieval.summaries.push(summary);
            retrieval.results.push(result);

            if index + 1 < total && !self.settings.inter_batch_delay.is_zero() {
                debug!(delay = ?self.settings.inter_batch_delay, "Pausing before next batch");
                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }
        }

        retrieval
    }

    /// Fetches one batch. The flag reports an upstream token rejection.
    async fn fetch_batch(
        &self,
        session: &Session,
        batch: &Batch,
        started_at: DateTime<Utc>,
    ) -> (BatchResult, bool) {
        match self.fetcher.fetch_batch(session, batch).await {
            Ok(report) => {
                let mut result = BatchResult::completed(
                    batch.number,
                    batch.len(),
                    report.details,
                    report.retries,
                    started_at,
                );
                result.timed_out = report.timed_out;
                (result, report.token_expired)
            }
            Err(error) => {
                let error = FetchError::BatchFailed {
                    batch: batch.number,
                    reason: error.to_string(),
                };
                warn!(error = %error, "Batch could not be fetched");
                (
                    BatchResult::failed(batch.number, batch.len(), error.to_string(), started_at),
                    false,
                )
            }
        }
    }

    async fn abort(&self, logger: &mut ExecutionLogger, error: &str, retries: u64) {
        let mut summary = RunSummary::aborted(error);
        summary.retries_performed = retries;
        match logger.finish_run(summary) {
            Ok(record) => self.persist_execution(&record).await,
            Err(e) => warn!(error = %e, "Execution record already finalized"),
        }
    }

    async fn persist_execution(&self, record: &ExecutionRecord) {
        if let Err(error) = self.sink.write_execution(record).await {
            warn!(
                sink = self.sink.name(),
                execution_id = %record.execution_id,
                error = %error,
                "Failed to persist execution record"
            );
        }
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("source", &self.source.name())
            .field("sink", &self.sink.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
