//! Result combiner.
//!
//! Merges per-batch partial results into one [`CombinedResult`]. Aggregate
//! counters are summed from each batch's own metadata rather than recomputed
//! from the records, so retries already consumed upstream are counted once.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{BatchResult, CombinedResult, RetrievalMetadata, TerminalDetail};

/// Combines batch results into one dataset.
///
/// Records are deduplicated by `terminal_id`, keeping the most recently
/// retrieved one. Duplicates mean the batch partition was violated, so each
/// one is logged and counted in `duplicates_resolved`.
pub fn combine(batch_results: &[BatchResult]) -> CombinedResult {
    let mut metadata = RetrievalMetadata::new();
    let mut by_id: HashMap<String, TerminalDetail> = HashMap::new();
    let mut duplicates = 0usize;
    let mut failed_batches = Vec::new();

    for batch in batch_results {
        metadata.absorb(&batch.metadata);

        if !batch.succeeded() {
            failed_batches.push(batch.batch_number);
        }

        for detail in &batch.details {
            match by_id.get(&detail.terminal_id) {
                Some(existing) => {
                    duplicates += 1;
                    warn!(
                        terminal_id = %detail.terminal_id,
                        batch = batch.batch_number,
                        "Terminal appears in more than one batch"
                    );
                    if detail.retrieved_at > existing.retrieved_at {
                        by_id.insert(detail.terminal_id.clone(), detail.clone());
                    }
                }
                None => {
                    by_id.insert(detail.terminal_id.clone(), detail.clone());
                }
            }
        }
    }

    let mut details: Vec<TerminalDetail> = by_id.into_values().collect();
    details.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));

    let successful_batches = batch_results.len() - failed_batches.len();
    debug!(
        batches = batch_results.len(),
        successful_batches,
        records = details.len(),
        duplicates,
        "Combined batch results"
    );

    CombinedResult {
        details,
        metadata,
        total_batches: batch_results.len(),
        successful_batches,
        failed_batches,
        duplicates_resolved: duplicates,
    }
}

// ============================================================================
// Tests
// ============================================================================
