//! End-to-end orchestrator tests against in-process upstream doubles.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use atmwatch_core::{
    Batch, BatchResult, CanonicalStatus, CombinedResult, CoreError, Credential, CredentialRole,
    ExecutionRecord, MemorySink, ResultSink, Session, Terminal, TerminalDetail,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::{Authenticator, LoginTransport};
use crate::context::{FetchContext, FetchSettings};
use crate::demo::DemoSource;
use crate::error::FetchError;
use crate::fetcher::{BatchFetcher, FetchReport, TerminalFetcher};
use crate::pipeline::{BatchOrchestrator, PipelineSettings};
use crate::source::TerminalSource;

// ============================================================================
// Doubles
// ============================================================================

#[derive(Clone, Copy)]
enum Behavior {
    AlwaysTimeout,
    Status(&'static str),
    ExpiredFor(&'static str),
}

#[derive(Default)]
struct ScriptedSource {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedSource {
    fn with(mut self, id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(id.to_string(), behavior);
        self
    }

    fn calls(&self, id: &str) -> u32 {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TerminalSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, _: &Session, _: &str) -> Result<Vec<Terminal>, FetchError> {
        Ok(Vec::new())
    }

    async fn fetch_detail(
        &self,
        session: &Session,
        terminal: &Terminal,
    ) -> Result<TerminalDetail, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(terminal.terminal_id.clone())
            .or_default() += 1;

        match self.behaviors.get(&terminal.terminal_id) {
            Some(Behavior::AlwaysTimeout) => Err(FetchError::Timeout(Duration::from_secs(30))),
            Some(Behavior::Status(raw)) => {
                Ok(TerminalDetail::new(terminal.terminal_id.clone(), Some(*raw)))
            }
            Some(Behavior::ExpiredFor(token)) if session.token == *token => {
                Err(FetchError::TokenExpired)
            }
            _ => Ok(TerminalDetail::new(terminal.terminal_id.clone(), Some("AVAILABLE"))),
        }
    }
}

/// Fails one batch number at the batch level.
struct FlakyFetcher {
    inner: TerminalFetcher,
    failing_batch: u32,
}

#[async_trait]
impl BatchFetcher for FlakyFetcher {
    async fn fetch_batch(&self, session: &Session, batch: &Batch) -> Result<FetchReport, FetchError> {
        if batch.number == self.failing_batch {
            return Err(FetchError::InvalidRequest("worker pool could not start".into()));
        }
        self.inner.fetch_batch(session, batch).await
    }
}

/// Accepts one username and issues numbered tokens.
struct CountingTransport {
    accepted_user: &'static str,
    issued: AtomicU32,
}

impl CountingTransport {
    fn accepting(user: &'static str) -> Arc<Self> {
        Arc::new(Self {
            accepted_user: user,
            issued: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl LoginTransport for CountingTransport {
    async fn login(&self, credential: &Credential) -> Result<Value, FetchError> {
        if credential.username != self.accepted_user {
            return Err(FetchError::from_status(403, "invalid credentials"));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "header": { "user_token": format!("tok-{n}") } }))
    }

    async fn logout(&self, _session: &Session) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Drops every other login with a transient error and numbers the tokens
/// it does issue.
#[derive(Default)]
struct UnsteadyTransport {
    calls: AtomicU32,
}

#[async_trait]
impl LoginTransport for UnsteadyTransport {
    async fn login(&self, _credential: &Credential) -> Result<Value, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % 2 == 1 {
            return Err(FetchError::TransientNetwork("connection reset".into()));
        }
        Ok(json!({ "token": format!("tok-{}", call / 2) }))
    }

    async fn logout(&self, _session: &Session) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Sink whose combined write always fails.
#[derive(Default)]
struct BrokenCombinedSink {
    inner: MemorySink,
}

#[async_trait]
impl ResultSink for BrokenCombinedSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn write_batch(&self, id: Uuid, batch: &BatchResult) -> Result<(), CoreError> {
        self.inner.write_batch(id, batch).await
    }

    async fn write_combined(&self, _: Uuid, _: &CombinedResult) -> Result<(), CoreError> {
        Err(CoreError::Persistence("disk full".into()))
    }

    async fn write_execution(&self, record: &ExecutionRecord) -> Result<(), CoreError> {
        self.inner.write_execution(record).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_settings() -> FetchSettings {
    FetchSettings::default()
        .with_max_workers(3)
        .with_max_retries(2)
        .with_retry_base_delay(Duration::from_millis(1))
}

fn pipeline(batch_size: usize) -> PipelineSettings {
    PipelineSettings::default()
        .with_batch_size(batch_size)
        .with_delay(Duration::ZERO)
}

fn terminals(n: usize) -> Vec<Terminal> {
    (1..=n).map(|i| Terminal::new(format!("T{i:02}"))).collect()
}

fn live_context(source: Arc<dyn TerminalSource>, transport: Arc<CountingTransport>) -> FetchContext {
    let authenticator = Authenticator::new(
        transport,
        Credential::new("ops", "wrong"),
        Credential::new("backup", "secret"),
    );
    FetchContext::builder()
        .authenticator(authenticator)
        .source(source)
        .settings(fast_settings())
        .build()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_demo_run_fourteen_terminals() {
    let ctx = FetchContext::demo(14, fast_settings());
    let sink = Arc::new(MemorySink::new());
    let orchestrator = BatchOrchestrator::new(&ctx, sink.clone(), pipeline(5));

    let report = orchestrator.run(None).await.unwrap().into_result().unwrap();

    let sizes: Vec<_> = report.batches.iter().map(|b| b.requested).collect();
    assert_eq!(sizes, vec![5, 5, 4]);
    assert_eq!(report.combined.total_terminals(), 14);
    assert!((report.combined.success_rate() - 100.0).abs() < f64::EPSILON);
    assert_eq!(report.role, CredentialRole::Demo);
    assert!(report.probe.is_none());

    assert_eq!(sink.batches().len(), 3);
    assert_eq!(sink.combined().len(), 1);
    let executions = sink.executions();
    assert_eq!(executions.len(), 1);
    assert!(executions[0].is_finalized());
    assert!(executions[0].success);
}

#[tokio::test]
async fn test_fallback_credential_session() {
    let transport = CountingTransport::accepting("backup");
    let ctx = live_context(Arc::new(DemoSource::new(3)), transport);
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(5));

    let report = orchestrator.run(Some(DemoSource::new(3).terminals().to_vec())).await.unwrap();
    assert_eq!(report.role, CredentialRole::Fallback);
    assert_eq!(report.combined.metadata.successful_retrievals, 3);
}

#[tokio::test]
async fn test_exhausted_terminal_marked_others_succeed() {
    let source = Arc::new(ScriptedSource::default().with("T03", Behavior::AlwaysTimeout));
    let ctx = live_context(source.clone(), CountingTransport::accepting("ops"));
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(5));

    let report = orchestrator.run(Some(terminals(5))).await.unwrap();

    assert_eq!(source.calls("T03"), 3);
    let failures: Vec<_> = report.combined.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].terminal_id, "T03");
    assert_eq!(report.combined.metadata.successful_retrievals, 4);
    assert_eq!(report.combined.metadata.retries_performed, 2);
    assert_eq!(report.execution.terminal_errors.get("T03"), Some(&1));
}

#[tokio::test]
async fn test_batch_level_failure_does_not_abort_run() {
    let source: Arc<dyn TerminalSource> = Arc::new(ScriptedSource::default());
    let ctx = live_context(source.clone(), CountingTransport::accepting("ops"));
    let fetcher = FlakyFetcher {
        inner: TerminalFetcher::new(source, &fast_settings()),
        failing_batch: 2,
    };
    let sink = Arc::new(MemorySink::new());
    let orchestrator =
        BatchOrchestrator::new(&ctx, sink.clone(), pipeline(5)).with_fetcher(Arc::new(fetcher));

    let report = orchestrator.run(Some(terminals(15))).await.unwrap();

    assert_eq!(report.combined.successful_batches, 2);
    assert_eq!(report.combined.failed_batches, vec![2]);
    assert_eq!(report.combined.details.len(), 10);
    assert!(report.combined.details.iter().any(|d| d.terminal_id == "T01"));
    assert!(report.combined.details.iter().any(|d| d.terminal_id == "T15"));
    assert!(!report.combined.details.iter().any(|d| d.terminal_id == "T07"));
    assert_eq!(report.combined.total_terminals(), 15);
    assert_eq!(report.execution.failed_batches, 1);
    assert_eq!(sink.batches().len(), 3);
    assert!(report.batches[1].error.is_some());
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_unrecognized_status_kept_as_unknown() {
    let source = Arc::new(ScriptedSource::default().with("T02", Behavior::Status("FOO")));
    let ctx = live_context(source, CountingTransport::accepting("ops"));
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(5));

    let report = orchestrator.run(Some(terminals(3))).await.unwrap();

    let foo = report
        .combined
        .details
        .iter()
        .find(|d| d.terminal_id == "T02")
        .unwrap();
    assert_eq!(foo.status, CanonicalStatus::Unknown);
    assert!(foo.is_success());
    assert_eq!(
        report.combined.metadata.status_counts.get(CanonicalStatus::Unknown),
        1
    );
}

// ============================================================================
// Orchestration Behavior
// ============================================================================

#[tokio::test]
async fn test_max_batches_caps_run() {
    let ctx = FetchContext::demo(14, fast_settings());
    let sink = Arc::new(MemorySink::new());
    let settings = pipeline(5).with_max_batches(Some(2));
    let orchestrator = BatchOrchestrator::new(&ctx, sink.clone(), settings);

    let report = orchestrator.run(None).await.unwrap();
    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.combined.total_terminals(), 10);
    assert_eq!(sink.batches().len(), 2);
}

#[tokio::test]
async fn test_delay_between_batches_only() {
    let ctx = FetchContext::demo(10, fast_settings());
    let settings = pipeline(5).with_delay(Duration::from_millis(60));
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), settings);

    let start = Instant::now();
    orchestrator.run(None).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(60));

    let ctx = FetchContext::demo(5, fast_settings());
    let settings = pipeline(5).with_delay(Duration::from_secs(5));
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), settings);

    let start = Instant::now();
    orchestrator.run(None).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_expired_token_refreshed_before_next_batch() {
    let source = Arc::new(ScriptedSource::default().with("T02", Behavior::ExpiredFor("tok-1")));
    let transport = CountingTransport::accepting("ops");
    let ctx = live_context(source.clone(), transport.clone());
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(2));

    let report = orchestrator.run(Some(terminals(4))).await.unwrap();

    assert_eq!(transport.issued.load(Ordering::SeqCst), 2);
    assert_eq!(report.combined.metadata.token_refreshes, 1);
    assert_eq!(report.execution.token_refreshes, 1);
    assert_eq!(report.combined.failures().count(), 1);
    // The token error is not retried.
    assert_eq!(source.calls("T02"), 1);
}

#[tokio::test]
async fn test_authentication_failure_aborts() {
    let sink = Arc::new(MemorySink::new());
    let ctx = live_context(
        Arc::new(ScriptedSource::default()),
        CountingTransport::accepting("nobody"),
    );
    let orchestrator = BatchOrchestrator::new(&ctx, sink.clone(), pipeline(5));

    let result = orchestrator.run(Some(terminals(3))).await;

    assert!(matches!(result, Err(FetchError::Auth(_))));
    assert!(sink.batches().is_empty());
    let executions = sink.executions();
    assert_eq!(executions.len(), 1);
    assert!(executions[0].is_finalized());
    assert!(!executions[0].success);
    assert!(executions[0].error.is_some());
}

#[tokio::test]
async fn test_no_successful_batch_is_run_failure() {
    let source: Arc<dyn TerminalSource> = Arc::new(ScriptedSource::default());
    let ctx = live_context(source.clone(), CountingTransport::accepting("ops"));
    let fetcher = FlakyFetcher {
        inner: TerminalFetcher::new(source, &fast_settings()),
        failing_batch: 1,
    };
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(5))
        .with_fetcher(Arc::new(fetcher));

    let report = orchestrator.run(Some(terminals(3))).await.unwrap();
    assert!(!report.execution.success);
    assert!(matches!(report.into_result(), Err(FetchError::RunFailed(_))));
}

#[tokio::test]
async fn test_empty_universe_is_run_failure() {
    let ctx = live_context(
        Arc::new(ScriptedSource::default()),
        CountingTransport::accepting("ops"),
    );
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(5));

    let report = orchestrator.run(None).await.unwrap();
    assert_eq!(report.combined.total_batches, 0);
    assert!(report.into_result().is_err());
}

#[tokio::test]
async fn test_persist_failure_marks_execution_unsuccessful() {
    let sink = Arc::new(BrokenCombinedSink::default());
    let ctx = FetchContext::demo(4, fast_settings());
    let orchestrator = BatchOrchestrator::new(&ctx, sink.clone(), pipeline(5));

    let report = orchestrator.run(None).await.unwrap();

    assert!(!report.execution.success);
    assert_eq!(sink.inner.batches().len(), 1);
    // Data was still retrieved, so the run itself did not fail.
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_phases_recorded_in_order() {
    let ctx = FetchContext::demo(3, fast_settings());
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(5));

    let report = orchestrator.run(None).await.unwrap();
    let phases: Vec<_> = report
        .execution
        .phases
        .iter()
        .map(|p| p.phase.as_str())
        .collect();
    assert_eq!(
        phases,
        vec![
            "AUTHENTICATION",
            "DISCOVERY",
            "BATCH_RETRIEVAL",
            "COMBINE",
            "PERSIST",
            "LOGOUT"
        ]
    );
    assert!(report.execution.phases.iter().all(|p| p.duration_ms.is_some()));
}

// ============================================================================
// Retry Telemetry
// ============================================================================

fn unsteady_context(source: Arc<dyn TerminalSource>) -> FetchContext {
    let authenticator = Authenticator::new(
        Arc::new(UnsteadyTransport::default()),
        Credential::new("ops", "secret"),
        Credential::new("backup", "secret"),
    )
    .with_retry(fast_settings().retry_policy());
    FetchContext::builder()
        .authenticator(authenticator)
        .source(source)
        .settings(fast_settings())
        .build()
}

#[tokio::test]
async fn test_login_retries_reach_execution_record() {
    let ctx = unsteady_context(Arc::new(ScriptedSource::default()));
    let sink = Arc::new(MemorySink::new());
    let orchestrator = BatchOrchestrator::new(&ctx, sink.clone(), pipeline(5));

    let report = orchestrator.run(Some(terminals(3))).await.unwrap();

    assert_eq!(report.combined.metadata.retries_performed, 0);
    assert_eq!(report.execution.retries_performed, 1);
    assert_eq!(sink.executions()[0].retries_performed, 1);
}

#[tokio::test]
async fn test_refresh_and_terminal_retries_summed() {
    let source = Arc::new(
        ScriptedSource::default()
            .with("T02", Behavior::ExpiredFor("tok-1"))
            .with("T04", Behavior::AlwaysTimeout),
    );
    let ctx = unsteady_context(source);
    let orchestrator = BatchOrchestrator::new(&ctx, Arc::new(MemorySink::new()), pipeline(2));

    let report = orchestrator.run(Some(terminals(4))).await.unwrap();

    // T04 is retried twice; each of the two logins needs one retry.
    assert_eq!(report.combined.metadata.retries_performed, 2);
    assert_eq!(report.execution.token_refreshes, 1);
    assert_eq!(report.execution.retries_performed, 4);
}

#[tokio::test]
async fn test_failed_login_retries_recorded_on_abort() {
    let transport: Arc<dyn LoginTransport> = Arc::new(AlwaysDownTransport);
    let authenticator = Authenticator::new(
        transport,
        Credential::new("ops", "secret"),
        Credential::new("backup", "secret"),
    )
    .with_retry(fast_settings().retry_policy());
    let ctx = FetchContext::builder()
        .authenticator(authenticator)
        .source(Arc::new(ScriptedSource::default()))
        .settings(fast_settings())
        .build();
    let sink = Arc::new(MemorySink::new());
    let orchestrator = BatchOrchestrator::new(&ctx, sink.clone(), pipeline(5));

    assert!(orchestrator.run(Some(terminals(2))).await.is_err());

    // Three attempts per credential, two retries each.
    let executions = sink.executions();
    assert_eq!(executions[0].retries_performed, 4);
}

/// Login endpoint that never answers.
struct AlwaysDownTransport;

#[async_trait]
impl LoginTransport for AlwaysDownTransport {
    async fn login(&self, _credential: &Credential) -> Result<Value, FetchError> {
        Err(FetchError::Timeout(Duration::from_secs(10)))
    }

    async fn logout(&self, _session: &Session) -> Result<(), FetchError> {
        Ok(())
    }
}
