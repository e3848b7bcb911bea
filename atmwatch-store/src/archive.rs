//! Per-run JSON archive.
//!
//! Layout under the archive root:
//!
//! ```text
//! <root>/<execution_id>/batch_001.json
//! <root>/<execution_id>/batch_002.json
//! <root>/<execution_id>/combined.json
//! <root>/<execution_id>/execution.json
//! ```
//!
//! Each file is written atomically, so a crash mid-run leaves every batch
//! written so far readable on its own.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use atmwatch_core::{BatchResult, CombinedResult, CoreError, ExecutionRecord, ResultSink};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::persistence::{load_json, save_json};

const COMBINED_FILE: &str = "combined.json";
const EXECUTION_FILE: &str = "execution.json";

/// File-per-batch JSON archive.
#[derive(Debug, Clone)]
pub struct JsonArchive {
    root: PathBuf,
}

impl JsonArchive {
    /// Creates an archive rooted at `root`. Nothing is created until the
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one run's files.
    pub fn run_dir(&self, execution_id: Uuid) -> PathBuf {
        self.root.join(execution_id.to_string())
    }

    /// Path of one batch file.
    pub fn batch_path(&self, execution_id: Uuid, batch_number: u32) -> PathBuf {
        self.run_dir(execution_id)
            .join(format!("batch_{batch_number:03}.json"))
    }

    /// Saves one batch result.
    pub async fn save_batch(&self, execution_id: Uuid, batch: &BatchResult) -> Result<(), StoreError> {
        let path = self.batch_path(execution_id, batch.batch_number);
        save_json(&path, batch).await?;
        debug!(
            batch = batch.batch_number,
            path = %path.display(),
            "Archived batch"
        );
        Ok(())
    }

    /// Saves the combined dataset.
    pub async fn save_combined(
        &self,
        execution_id: Uuid,
        combined: &CombinedResult,
    ) -> Result<(), StoreError> {
        let path = self.run_dir(execution_id).join(COMBINED_FILE);
        save_json(&path, combined).await?;
        info!(
            terminals = combined.total_terminals(),
            path = %path.display(),
            "Archived combined result"
        );
        Ok(())
    }

    /// Saves an execution record, refusing to replace a finalized one.
    pub async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let path = self.run_dir(record.execution_id).join(EXECUTION_FILE);
        if path.exists() {
            let existing: ExecutionRecord = load_json(&path).await?;
            if existing.is_finalized() {
                return Err(StoreError::AlreadyFinalized(record.execution_id.to_string()));
            }
        }
        save_json(&path, record).await
    }

    /// Loads every batch written for a run, ordered by batch number.
    pub async fn load_batches(&self, execution_id: Uuid) -> Result<Vec<BatchResult>, StoreError> {
        let dir = self.run_dir(execution_id);
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut batches = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("batch_") && name.ends_with(".json") {
                batches.push(load_json::<BatchResult>(&entry.path()).await?);
            }
        }

        batches.sort_by_key(|b| b.batch_number);
        Ok(batches)
    }

    /// Loads the combined dataset for a run.
    pub async fn load_combined(&self, execution_id: Uuid) -> Result<CombinedResult, StoreError> {
        load_json(&self.run_dir(execution_id).join(COMBINED_FILE)).await
    }

    /// Loads the execution record for a run.
    pub async fn load_execution(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        load_json(&self.run_dir(execution_id).join(EXECUTION_FILE)).await
    }
}

#[async_trait]
impl ResultSink for JsonArchive {
    fn name(&self) -> &str {
        "archive"
    }

    async fn write_batch(&self, execution_id: Uuid, batch: &BatchResult) -> Result<(), CoreError> {
        Ok(self.save_batch(execution_id, batch).await?)
    }

    async fn write_combined(
        &self,
        execution_id: Uuid,
        combined: &CombinedResult,
    ) -> Result<(), CoreError> {
        Ok(self.save_combined(execution_id, combined).await?)
    }

    async fn write_execution(&self, record: &ExecutionRecord) -> Result<(), CoreError> {
        Ok(self.save_execution(record).await?)
    }
}
