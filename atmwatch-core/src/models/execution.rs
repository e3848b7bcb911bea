//! Execution record types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Phase
// ============================================================================

/// Named checkpoint in a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Upstream reachability probe.
    ConnectivityCheck,
    /// Login against the upstream.
    Authentication,
    /// Discovery of the terminal universe.
    Discovery,
    /// Sequential batch processing.
    BatchRetrieval,
    /// Merging batch results.
    Combine,
    /// Writing the final dataset.
    Persist,
    /// Session invalidation.
    Logout,
}

impl Phase {
    /// Returns the wire name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectivityCheck => "CONNECTIVITY_CHECK",
            Self::Authentication => "AUTHENTICATION",
            Self::Discovery => "DISCOVERY",
            Self::BatchRetrieval => "BATCH_RETRIEVAL",
            Self::Combine => "COMBINE",
            Self::Persist => "PERSIST",
            Self::Logout => "LOGOUT",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A phase checkpoint with its derived duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    /// The phase.
    pub phase: Phase,
    /// When the phase was marked.
    pub started_at: DateTime<Utc>,
    /// Time until the next mark (or run end). `None` while still open.
    pub duration_ms: Option<i64>,
}

// ============================================================================
// Execution Record
// ============================================================================

/// One row per pipeline run.
///
/// Created at run start, finalized at run end, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Execution identifier.
    pub execution_id: Uuid,
    /// Run start (UTC).
    pub started_at: DateTime<Utc>,
    /// Run end (UTC).
    pub ended_at: Option<DateTime<Utc>>,
    /// Total duration in milliseconds.
    pub duration_ms: Option<i64>,
    /// Phase checkpoints in order.
    pub phases: Vec<PhaseTiming>,
    /// Number of failed terminal outcomes.
    pub terminal_error_count: u64,
    /// Failure count per terminal.
    #[serde(default)]
    pub terminal_errors: BTreeMap<String, u32>,
    /// Terminals requested.
    pub total_terminals: usize,
    /// Terminals retrieved successfully.
    pub successful_retrievals: usize,
    /// Batches whose fetch infrastructure ran.
    pub successful_batches: usize,
    /// Batches that failed at batch level.
    pub failed_batches: usize,
    /// Retries performed across every upstream request of the run.
    pub retries_performed: u64,
    /// Re-authentications performed.
    pub token_refreshes: u32,
    /// True iff at least one batch succeeded and persistence completed.
    pub success: bool,
    /// Free-form failure note for failed runs.
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Creates a fresh, open record.
    pub fn start() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            phases: Vec::new(),
            terminal_error_count: 0,
            terminal_errors: BTreeMap::new(),
            total_terminals: 0,
            successful_retrievals: 0,
            successful_batches: 0,
            failed_batches: 0,
            retries_performed: 0,
            token_refreshes: 0,
            success: false,
            error: None,
        }
    }

    /// Returns true once the record was finalized.
    pub fn is_finalized(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Returns the duration of a phase, if recorded and closed.
    pub fn phase_duration_ms(&self, phase: Phase) -> Option<i64> {
        self.phases
            .iter()
            .find(|p| p.phase == phase)
            .and_then(|p| p.duration_ms)
    }
}
