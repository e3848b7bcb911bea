//! SQLite store.
//!
//! Three tables: `execution_records` (one row per run), `batches` (one row
//! per batch) and `terminal_details` (one row per terminal per run). Status
//! aggregation reads the raw upstream value and runs it through
//! [`atmwatch_core::normalize`], the same normalizer the pipeline uses.
//!
//! `rusqlite` is synchronous; every call runs on the blocking pool behind a
//! mutex.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use atmwatch_core::{
    BatchResult, CoreError, ExecutionRecord, ResultSink, StatusCounts, TerminalDetail, normalize,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS execution_records (
    execution_id TEXT PRIMARY KEY,
    started_at   TEXT NOT NULL,
    ended_at     TEXT,
    success      INTEGER NOT NULL DEFAULT 0,
    record_json  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS batches (
    execution_id    TEXT NOT NULL,
    batch_number    INTEGER NOT NULL,
    requested       INTEGER NOT NULL,
    successful      INTEGER NOT NULL,
    failed          INTEGER NOT NULL,
    retries         INTEGER NOT NULL,
    token_refreshes INTEGER NOT NULL,
    timed_out       INTEGER NOT NULL,
    error           TEXT,
    started_at      TEXT NOT NULL,
    finished_at     TEXT NOT NULL,
    PRIMARY KEY (execution_id, batch_number)
);

CREATE TABLE IF NOT EXISTS terminal_details (
    execution_id  TEXT NOT NULL,
    terminal_id   TEXT NOT NULL,
    batch_number  INTEGER NOT NULL,
    raw_status    TEXT,
    failure       TEXT,
    retrieved_at  TEXT NOT NULL,
    detail_json   TEXT NOT NULL,
    PRIMARY KEY (execution_id, terminal_id)
);

CREATE INDEX IF NOT EXISTS idx_execution_started ON execution_records (started_at);
";

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Parse(format!("timestamp {raw:?}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Parse(format!("execution id {raw:?}: {e}")))
}

// ============================================================================
// Query Results
// ============================================================================

/// Status counts for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    /// Run the counts belong to.
    pub execution_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Terminals per canonical status.
    pub counts: StatusCounts,
}

impl StatusSummary {
    /// Total terminals counted.
    pub fn total(&self) -> usize {
        self.counts.total()
    }
}

// ============================================================================
// Store
// ============================================================================

/// SQLite-backed result sink and query surface.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish()
    }
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "Opened result database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Stores one batch and its terminal details in a single transaction.
    pub async fn save_batch(&self, execution_id: Uuid, batch: &BatchResult) -> Result<(), StoreError> {
        let batch = batch.clone();
        let batch_number = batch.batch_number;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = execution_id.to_string();
            let meta = &batch.metadata;

            tx.execute(
                "INSERT OR REPLACE INTO batches (execution_id, batch_number, requested, successful,
                     failed, retries, token_refreshes, timed_out, error, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    batch.batch_number,
                    meta.total_terminals,
                    meta.successful_retrievals,
                    meta.failed_retrievals,
                    meta.retries_performed,
                    meta.token_refreshes,
                    batch.timed_out,
                    batch.error,
                    timestamp(&batch.started_at),
                    timestamp(&batch.finished_at),
                ],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO terminal_details (execution_id, terminal_id,
                         batch_number, raw_status, failure, retrieved_at, detail_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for detail in &batch.details {
                    stmt.execute(params![
                        id,
                        detail.terminal_id,
                        batch.batch_number,
                        detail.raw_status,
                        detail.failure,
                        timestamp(&detail.retrieved_at),
                        serde_json::to_string(detail)?,
                    ])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
        .await?;

        debug!(batch = batch_number, "Stored batch");
        Ok(())
    }

    /// Stores an execution record, refusing to replace a finalized one.
    pub async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = record.execution_id.to_string();

            let existing: Option<Option<String>> = tx
                .query_row(
                    "SELECT ended_at FROM execution_records WHERE execution_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if matches!(existing, Some(Some(_))) {
                return Err(StoreError::AlreadyFinalized(id));
            }

            tx.execute(
                "INSERT OR REPLACE INTO execution_records
                     (execution_id, started_at, ended_at, success, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    timestamp(&record.started_at),
                    record.ended_at.as_ref().map(timestamp),
                    record.success,
                    serde_json::to_string(&record)?,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Number of batch rows stored for a run.
    pub async fn batch_count(&self, execution_id: Uuid) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM batches WHERE execution_id = ?1",
                params![execution_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    /// Terminal details stored for a run, in terminal id order.
    pub async fn details(&self, execution_id: Uuid) -> Result<Vec<TerminalDetail>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT detail_json FROM terminal_details
                 WHERE execution_id = ?1 ORDER BY terminal_id",
            )?;
            let rows = stmt.query_map(params![execution_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?;

            let mut details = Vec::new();
            for json in rows {
                details.push(serde_json::from_str(&json?)?);
            }
            Ok(details)
        })
        .await
    }

    /// Status counts for the most recent run that stored any terminal.
    pub async fn status_summary(&self) -> Result<Option<StatusSummary>, StoreError> {
        let mut trend = self.status_trend(1).await?;
        Ok(trend.pop())
    }

    /// Status counts for each of the last `runs` runs, oldest first.
    pub async fn status_trend(&self, runs: usize) -> Result<Vec<StatusSummary>, StoreError> {
        self.with_conn(move |conn| {
            let mut runs_stmt = conn.prepare(
                "SELECT e.execution_id, e.started_at FROM execution_records e
                 WHERE EXISTS (SELECT 1 FROM terminal_details d WHERE d.execution_id = e.execution_id)
                 ORDER BY e.started_at DESC LIMIT ?1",
            )?;
            let run_rows = runs_stmt.query_map(params![runs], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut status_stmt = conn.prepare(
                "SELECT raw_status FROM terminal_details WHERE execution_id = ?1",
            )?;

            let mut summaries = Vec::new();
            for run in run_rows {
                let (id, started_at) = run?;
                let statuses = status_stmt.query_map(params![id], |row| {
                    row.get::<_, Option<String>>(0)
                })?;

                let mut counts = StatusCounts::new();
                for raw in statuses {
                    counts.record(normalize(raw?.as_deref().unwrap_or_default()));
                }

                summaries.push(StatusSummary {
                    execution_id: parse_uuid(&id)?,
                    started_at: parse_timestamp(&started_at)?,
                    counts,
                });
            }

            summaries.reverse();
            Ok(summaries)
        })
        .await
    }

    /// Most recent execution records, newest first.
    pub async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record_json FROM execution_records ORDER BY started_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for json in rows {
                records.push(serde_json::from_str(&json?)?);
            }
            Ok(records)
        })
        .await
    }
}

#[async_trait]
impl ResultSink for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn write_batch(&self, execution_id: Uuid, batch: &BatchResult) -> Result<(), CoreError> {
        Ok(self.save_batch(execution_id, batch).await?)
    }

    async fn write_execution(&self, record: &ExecutionRecord) -> Result<(), CoreError> {
        Ok(self.save_execution(record).await?)
    }
}
