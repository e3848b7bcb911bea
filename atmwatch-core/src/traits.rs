//! Trait definitions for atmwatch.
//!
//! A result sink accepts batch-scoped writes and execution-record writes.
//! Each batch write stands alone, so a crash mid-run keeps every batch
//! already written.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{BatchResult, CombinedResult, ExecutionRecord};

/// Destination for pipeline results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Persists one batch's partial result.
    ///
    /// Must succeed regardless of whether other batches of the same run
    /// were or will be written.
    async fn write_batch(&self, execution_id: Uuid, batch: &BatchResult) -> Result<(), CoreError>;

    /// Persists the combined dataset for a run.
    async fn write_combined(
        &self,
        _execution_id: Uuid,
        _combined: &CombinedResult,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// Persists an execution record.
    ///
    /// Called once when the run starts and once when it is finalized.
    /// A finalized record must never be overwritten.
    async fn write_execution(&self, record: &ExecutionRecord) -> Result<(), CoreError>;
}

// ============================================================================
// Fan-out Sink
// ============================================================================

/// Writes to several sinks in order. Fails on the first failing sink.
pub struct FanoutSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl FanoutSink {
    /// Creates a fan-out over the given sinks.
    pub fn new(sinks: Vec<Box<dyn ResultSink>>) -> Self {
        Self { sinks }
    }

    /// Returns the number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl ResultSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn write_batch(&self, execution_id: Uuid, batch: &BatchResult) -> Result<(), CoreError> {
        for sink in &self.sinks {
            sink.write_batch(execution_id, batch).await?;
        }
        Ok(())
    }

    async fn write_combined(
        &self,
        execution_id: Uuid,
        combined: &CombinedResult,
    ) -> Result<(), CoreError> {
        for sink in &self.sinks {
            sink.write_combined(execution_id, combined).await?;
        }
        Ok(())
    }

    async fn write_execution(&self, record: &ExecutionRecord) -> Result<(), CoreError> {
        for sink in &self.sinks {
            sink.write_execution(record).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Memory Sink
// ============================================================================

/// In-memory sink, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<(Uuid, BatchResult)>>,
    combined: Mutex<Vec<(Uuid, CombinedResult)>>,
    executions: Mutex<Vec<ExecutionRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the batches written so far.
    pub fn batches(&self) -> Vec<BatchResult> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, b)| b.clone())
            .collect()
    }

    /// Returns the combined results written so far.
    pub fn combined(&self) -> Vec<CombinedResult> {
        self.combined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Returns the latest version of each execution record.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&self, execution_id: Uuid, batch: &BatchResult) -> Result<(), CoreError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((execution_id, batch.clone()));
        Ok(())
    }

    async fn write_combined(
        &self,
        execution_id: Uuid,
        combined: &CombinedResult,
    ) -> Result<(), CoreError> {
        self.combined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((execution_id, combined.clone()));
        Ok(())
    }

    async fn write_execution(&self, record: &ExecutionRecord) -> Result<(), CoreError> {
        let mut executions = self.executions.lock().unwrap_or_else(PoisonError::into_inner);
        match executions
            .iter_mut()
            .find(|r| r.execution_id == record.execution_id)
        {
            Some(existing) if existing.is_finalized() => Err(CoreError::AlreadyFinalized(
                record.execution_id.to_string(),
            )),
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => {
                executions.push(record.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_sink_rejects_rewrite_of_finalized_record() {
        let sink = MemorySink::new();
        let mut record = ExecutionRecord::start();
        sink.write_execution(&record).await.unwrap();

        record.ended_at = Some(Utc::now());
        sink.write_execution(&record).await.unwrap();
        assert!(sink.write_execution(&record).await.is_err());
        assert_eq!(sink.executions().len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_writes_every_sink() {
        let fanout = FanoutSink::new(vec![Box::new(MemorySink::new()), Box::new(MemorySink::new())]);
        let batch = BatchResult::completed(1, 0, Vec::new(), 0, Utc::now());
        fanout.write_batch(Uuid::new_v4(), &batch).await.unwrap();
        assert_eq!(fanout.len(), 2);
    }
}
