//! Batch and run result types.
//!
//! - [`Batch`] - A contiguous slice of the terminal universe
//! - [`BatchResult`] - What one batch produced
//! - [`RetrievalMetadata`] - Aggregate counters for a batch or a run
//! - [`CombinedResult`] - The unified dataset for one run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::StatusCounts;
use super::terminal::{Terminal, TerminalDetail};

// ============================================================================
// Success Rate
// ============================================================================

/// Computes `successful / total * 100`, defined as 0 when `total` is 0.
#[allow(clippy::cast_precision_loss)]
pub fn success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    successful as f64 / total as f64 * 100.0
}

// ============================================================================
// Batch
// ============================================================================

/// An ordered, fixed-size slice of the terminal universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based batch number.
    pub number: u32,
    /// Terminals in this batch, in universe order.
    pub terminals: Vec<Terminal>,
}

impl Batch {
    /// Splits `terminals` into contiguous batches of `batch_size`.
    ///
    /// The last batch may be smaller. A `batch_size` of 0 is treated as 1.
    pub fn partition(terminals: &[Terminal], batch_size: usize) -> Vec<Batch> {
        let size = batch_size.max(1);
        terminals
            .chunks(size)
            .zip(1u32..)
            .map(|(chunk, number)| Batch {
                number,
                terminals: chunk.to_vec(),
            })
            .collect()
    }

    /// Returns the number of terminals in the batch.
    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    /// Returns true if the batch has no terminals.
    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }
}

// ============================================================================
// Retrieval Metadata
// ============================================================================

/// Aggregate counters for a batch or a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    /// Terminals requested.
    pub total_terminals: usize,
    /// Terminals retrieved successfully.
    pub successful_retrievals: usize,
    /// Terminals that failed.
    pub failed_retrievals: usize,
    /// `successful_retrievals / total_terminals * 100`.
    pub success_rate: f64,
    /// Re-authentications performed.
    pub token_refreshes: u32,
    /// Retries performed by the retry policy.
    pub retries_performed: u64,
    /// Counts by canonical status across produced records.
    #[serde(default)]
    pub status_counts: StatusCounts,
    /// When the metadata was computed.
    pub timestamp: DateTime<Utc>,
}

impl RetrievalMetadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self {
            total_terminals: 0,
            successful_retrievals: 0,
            failed_retrievals: 0,
            success_rate: 0.0,
            token_refreshes: 0,
            retries_performed: 0,
            status_counts: StatusCounts::new(),
            timestamp: Utc::now(),
        }
    }

    /// Computes metadata for the records a batch produced.
    ///
    /// Requested terminals without a record count as failures.
    pub fn from_details(requested: usize, details: &[TerminalDetail], retries: u64) -> Self {
        let successful = details.iter().filter(|d| d.is_success()).count();
        let mut status_counts = StatusCounts::new();
        for detail in details {
            status_counts.record(detail.status);
        }
        Self {
            total_terminals: requested,
            successful_retrievals: successful,
            failed_retrievals: requested.saturating_sub(successful),
            success_rate: success_rate(successful, requested),
            token_refreshes: 0,
            retries_performed: retries,
            status_counts,
            timestamp: Utc::now(),
        }
    }

    /// Adds another metadata's counters into this one and recomputes the rate.
    pub fn absorb(&mut self, other: &RetrievalMetadata) {
        self.total_terminals += other.total_terminals;
        self.successful_retrievals += other.successful_retrievals;
        self.failed_retrievals += other.failed_retrievals;
        self.token_refreshes += other.token_refreshes;
        self.retries_performed += other.retries_performed;
        self.status_counts.merge(&other.status_counts);
        self.success_rate = success_rate(self.successful_retrievals, self.total_terminals);
    }
}

impl Default for RetrievalMetadata {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Batch Result
// ============================================================================

/// The partial result of one batch. Persisted independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// 1-based batch number.
    pub batch_number: u32,
    /// Records produced (successes and failure placeholders).
    pub details: Vec<TerminalDetail>,
    /// Batch counters.
    pub metadata: RetrievalMetadata,
    /// Batch-level failure, if the fetch infrastructure could not run.
    #[serde(default)]
    pub error: Option<String>,
    /// Whether the batch hit its timeout.
    #[serde(default)]
    pub timed_out: bool,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the batch finished.
    pub finished_at: DateTime<Utc>,
}

impl BatchResult {
    /// Creates a completed batch result.
    pub fn completed(
        batch_number: u32,
        requested: usize,
        details: Vec<TerminalDetail>,
        retries: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let metadata = RetrievalMetadata::from_details(requested, &details, retries);
        Self {
            batch_number,
            details,
            metadata,
            error: None,
            timed_out: false,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Creates a batch-level failure. Every requested terminal counts as failed.
    pub fn failed(
        batch_number: u32,
        requested: usize,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_number,
            details: Vec::new(),
            metadata: RetrievalMetadata::from_details(requested, &[], 0),
            error: Some(error.into()),
            timed_out: false,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Returns true if the batch's fetch infrastructure ran.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// ============================================================================
// Combined Result
// ============================================================================

/// The unified dataset for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    /// One record per terminal, ordered by `terminal_id`.
    pub details: Vec<TerminalDetail>,
    /// Aggregate counters summed over batches.
    pub metadata: RetrievalMetadata,
    /// Number of batches combined.
    pub total_batches: usize,
    /// Batches whose fetch infrastructure ran.
    pub successful_batches: usize,
    /// Numbers of batches that failed at batch level.
    pub failed_batches: Vec<u32>,
    /// Duplicate `terminal_id`s found across batches.
    #[serde(default)]
    pub duplicates_resolved: usize,
}

impl CombinedResult {
    /// Returns the total number of terminals requested.
    pub fn total_terminals(&self) -> usize {
        self.metadata.total_terminals
    }

    /// Returns the success rate in percent.
    pub fn success_rate(&self) -> f64 {
        self.metadata.success_rate
    }

    /// Returns true if at least one batch succeeded.
    pub fn has_successful_batch(&self) -> bool {
        self.successful_batches > 0
    }

    /// Returns the failure placeholders.
    pub fn failures(&self) -> impl Iterator<Item = &TerminalDetail> {
        self.details.iter().filter(|d| !d.is_success())
    }
}

// ============================================================================
// Tests
// ============================================================================
