//! Execution logger.
//!
//! Tracks phase checkpoints, per-terminal outcomes, and aggregate counters
//! for one end-to-end run. The logger is owned by the controlling task;
//! workers report outcomes through a channel that the controlling task
//! drains into [`ExecutionLogger::record_terminal_outcome`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::models::{CombinedResult, ExecutionRecord, Phase, PhaseTiming, TerminalOutcome};

// ============================================================================
// Run Summary
// ============================================================================

/// Final counters handed to [`ExecutionLogger::finish_run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Terminals requested.
    pub total_terminals: usize,
    /// Terminals retrieved successfully.
    pub successful_retrievals: usize,
    /// Batches whose fetch infrastructure ran.
    pub successful_batches: usize,
    /// Batches that failed at batch level.
    pub failed_batches: usize,
    /// Retries performed, terminal fetches and other upstream requests alike.
    pub retries_performed: u64,
    /// Re-authentications performed.
    pub token_refreshes: u32,
    /// Whether the final persistence step completed.
    pub persisted: bool,
    /// Failure note.
    pub error: Option<String>,
}

impl RunSummary {
    /// Builds a summary from a combined result.
    pub fn from_combined(combined: &CombinedResult, persisted: bool) -> Self {
        Self {
            total_terminals: combined.metadata.total_terminals,
            successful_retrievals: combined.metadata.successful_retrievals,
            successful_batches: combined.successful_batches,
            failed_batches: combined.failed_batches.len(),
            retries_performed: combined.metadata.retries_performed,
            token_refreshes: combined.metadata.token_refreshes,
            persisted,
            error: None,
        }
    }

    /// Builds a summary for a run that failed before any batch ran.
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// Execution Logger
// ============================================================================

/// Records one run's telemetry.
#[derive(Debug)]
pub struct ExecutionLogger {
    record: ExecutionRecord,
    terminal_errors: BTreeMap<String, u32>,
    terminal_outcomes: usize,
}

impl ExecutionLogger {
    /// Creates a logger with a fresh, open record.
    pub fn new() -> Self {
        Self {
            record: ExecutionRecord::start(),
            terminal_errors: BTreeMap::new(),
            terminal_outcomes: 0,
        }
    }

    /// Starts the run and returns a snapshot of the open record.
    pub fn start_run(&mut self) -> ExecutionRecord {
        self.record = ExecutionRecord::start();
        self.terminal_errors.clear();
        self.terminal_outcomes = 0;
        info!(execution_id = %self.record.execution_id, "Run started");
        self.record.clone()
    }

    /// Returns the current (possibly open) record.
    pub fn record(&self) -> &ExecutionRecord {
        &self.record
    }

    /// Marks the start of a phase. Closes the previous phase.
    pub fn mark_phase(&mut self, phase: Phase) {
        self.mark_phase_at(phase, Utc::now());
    }

    fn mark_phase_at(&mut self, phase: Phase, at: DateTime<Utc>) {
        if self.record.is_finalized() {
            return;
        }
        close_open_phase(&mut self.record.phases, at);
        debug!(phase = %phase, "Phase started");
        self.record.phases.push(PhaseTiming {
            phase,
            started_at: at,
            duration_ms: None,
        });
    }

    /// Records the outcome of one terminal fetch.
    pub fn record_terminal_outcome(&mut self, terminal_id: &str, outcome: &TerminalOutcome) {
        self.terminal_outcomes += 1;
        if outcome.is_failure() {
            *self.terminal_errors.entry(terminal_id.to_string()).or_insert(0) += 1;
        }
    }

    /// Returns the failure count for a terminal.
    pub fn terminal_error_count(&self, terminal_id: &str) -> u32 {
        self.terminal_errors.get(terminal_id).copied().unwrap_or(0)
    }

    /// Returns the failure counts for all terminals.
    pub fn terminal_errors(&self) -> &BTreeMap<String, u32> {
        &self.terminal_errors
    }

    /// Returns the total number of outcomes recorded.
    pub fn outcomes_recorded(&self) -> usize {
        self.terminal_outcomes
    }

    /// Finalizes the record.
    ///
    /// The run is successful iff at least one batch succeeded and
    /// persistence completed. A record can only be finalized once.
    pub fn finish_run(&mut self, summary: RunSummary) -> Result<ExecutionRecord, CoreError> {
        if self.record.is_finalized() {
            return Err(CoreError::AlreadyFinalized(
                self.record.execution_id.to_string(),
            ));
        }

        let ended_at = Utc::now().max(self.record.started_at);
        close_open_phase(&mut self.record.phases, ended_at);

        let record = &mut self.record;
        record.ended_at = Some(ended_at);
        record.duration_ms = Some((ended_at - record.started_at).num_milliseconds());
        record.terminal_errors = self.terminal_errors.clone();
        record.terminal_error_count = self.terminal_errors.values().map(|n| u64::from(*n)).sum();
        record.total_terminals = summary.total_terminals;
        record.successful_retrievals = summary.successful_retrievals;
        record.successful_batches = summary.successful_batches;
        record.failed_batches = summary.failed_batches;
        record.retries_performed = summary.retries_performed;
        record.token_refreshes = summary.token_refreshes;
        record.success = summary.successful_batches > 0 && summary.persisted;
        record.error = summary.error;

        info!(
            execution_id = %record.execution_id,
            success = record.success,
            duration_ms = record.duration_ms,
            terminal_errors = record.terminal_error_count,
            "Run finished"
        );

        Ok(record.clone())
    }
}

impl Default for ExecutionLogger {
    fn default() -> Self {
        Self::new()
    }
}

fn close_open_phase(phases: &mut [PhaseTiming], at: DateTime<Utc>) {
    if let Some(last) = phases.last_mut() {
        if last.duration_ms.is_none() {
            last.duration_ms = Some((at - last.started_at).num_milliseconds().max(0));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_phase_durations_are_derived() {
        let mut logger = ExecutionLogger::new();
        let t0 = Utc::now();
        logger.mark_phase_at(Phase::Authentication, t0);
        logger.mark_phase_at(Phase::BatchRetrieval, t0 + Duration::milliseconds(250));
        logger.mark_phase_at(Phase::Combine, t0 + Duration::milliseconds(1250));

        let record = logger.record();
        assert_eq!(record.phase_duration_ms(Phase::Authentication), Some(250));
        assert_eq!(record.phase_duration_ms(Phase::BatchRetrieval), Some(1000));
        assert_eq!(record.phase_duration_ms(Phase::Combine), None);
    }

    #[test]
    fn test_terminal_error_counts() {
        let mut logger = ExecutionLogger::new();
        logger.record_terminal_outcome("A", &TerminalOutcome::Success);
        logger.record_terminal_outcome("B", &TerminalOutcome::Failure("timeout".into()));
        logger.record_terminal_outcome("B", &TerminalOutcome::Failure("timeout".into()));

        assert_eq!(logger.terminal_error_count("A"), 0);
        assert_eq!(logger.terminal_error_count("B"), 2);
        assert_eq!(logger.outcomes_recorded(), 3);
    }

    #[test]
    fn test_finish_run_success_flag() {
        let mut logger = ExecutionLogger::new();
        logger.start_run();
        logger.mark_phase(Phase::BatchRetrieval);
        let record = logger
            .finish_run(RunSummary {
                successful_batches: 1,
                persisted: true,
                ..RunSummary::default()
            })
            .unwrap();
        assert!(record.success);
        assert!(record.is_finalized());
        assert!(record.phase_duration_ms(Phase::BatchRetrieval).is_some());
    }

    #[test]
    fn test_finish_run_requires_persistence() {
        let mut logger = ExecutionLogger::new();
        let record = logger
            .finish_run(RunSummary {
                successful_batches: 3,
                persisted: false,
                ..RunSummary::default()
            })
            .unwrap();
        assert!(!record.success);
    }

    #[test]
    fn test_record_is_append_only() {
        let mut logger = ExecutionLogger::new();
        logger.finish_run(RunSummary::aborted("auth")).unwrap();
        let second = logger.finish_run(RunSummary::default());
        assert!(matches!(second, Err(CoreError::AlreadyFinalized(_))));

        logger.mark_phase(Phase::Persist);
        assert!(logger.record().phases.is_empty());
    }
}
