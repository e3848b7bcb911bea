//! JSON output formatting.
//!
//! Timestamps stay in UTC (RFC 3339).

use std::collections::BTreeMap;

use anyhow::Result;
use atmwatch_core::{ExecutionRecord, StatusCounts};
use atmwatch_fetch::{BatchSummary, RunReport};
use atmwatch_store::StatusSummary;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::commands::check::CheckReport;

// ============================================================================
// Output Types
// ============================================================================

/// JSON output for a finished run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub execution_id: String,
    pub success: bool,
    pub credential: String,
    #[serde(serialize_with = "serialize_datetime")]
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_datetime_opt")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub total_terminals: usize,
    pub successful_retrievals: usize,
    pub failed_retrievals: usize,
    pub success_rate: f64,
    pub total_batches: usize,
    pub successful_batches: usize,
    pub failed_batches: Vec<u32>,
    pub retries_performed: u64,
    pub token_refreshes: u32,
    pub status_counts: BTreeMap<String, usize>,
    pub batches: Vec<BatchOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One batch line.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    pub batch_number: u32,
    pub requested: usize,
    pub successful: usize,
    pub failed: usize,
    pub retries: u64,
    pub timed_out: bool,
    pub persisted: bool,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connectivity probe result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutput {
    pub reachable: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Credential check result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutput {
    pub base_url: String,
    pub demo: bool,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeOutput>,
    pub attempts: Vec<AttemptOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One login attempt.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutput {
    pub credential: String,
    pub username: String,
    pub success: bool,
    pub retries: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status counts for one run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutput {
    pub execution_id: String,
    #[serde(serialize_with = "serialize_datetime")]
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub status_counts: BTreeMap<String, usize>,
}

fn serialize_datetime<S>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&dt.to_rfc3339())
}

#[allow(clippy::ref_option)]
fn serialize_datetime_opt<S>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match dt {
        Some(dt) => s.serialize_str(&dt.to_rfc3339()),
        None => s.serialize_none(),
    }
}

fn counts_map(counts: &StatusCounts) -> BTreeMap<String, usize> {
    counts
        .iter()
        .map(|(status, n)| (status.as_str().to_string(), n))
        .collect()
}

// ============================================================================
// JSON Formatter
// ============================================================================

/// JSON formatter.
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    /// Creates a new JSON formatter.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Formats any serializable value.
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(json)
    }

    /// Builds the run output.
    pub fn run_to_output(&self, report: &RunReport) -> RunOutput {
        let exec = &report.execution;
        let combined = &report.combined;

        RunOutput {
            execution_id: exec.execution_id.to_string(),
            success: exec.success,
            credential: report.role.to_string(),
            started_at: exec.started_at,
            ended_at: exec.ended_at,
            duration_ms: exec.duration_ms,
            total_terminals: combined.total_terminals(),
            successful_retrievals: combined.metadata.successful_retrievals,
            failed_retrievals: combined.metadata.failed_retrievals,
            success_rate: combined.success_rate(),
            total_batches: combined.total_batches,
            successful_batches: combined.successful_batches,
            failed_batches: combined.failed_batches.clone(),
            retries_performed: exec.retries_performed,
            token_refreshes: combined.metadata.token_refreshes,
            status_counts: counts_map(&combined.metadata.status_counts),
            batches: report.batches.iter().map(batch_to_output).collect(),
            probe: report.probe.as_ref().map(|p| ProbeOutput {
                reachable: p.success,
                response_time_ms: p.response_time_ms,
                status_code: p.status_code,
                error: p.error.clone(),
            }),
            error: exec.error.clone(),
        }
    }

    /// Formats a finished run.
    pub fn format_run(&self, report: &RunReport) -> Result<String> {
        self.format(&self.run_to_output(report))
    }

    /// Formats a credential check.
    pub fn format_check(&self, report: &CheckReport) -> Result<String> {
        let output = CheckOutput {
            base_url: report.base_url.clone(),
            demo: report.demo,
            authenticated: report.authenticated(),
            credential: report.role.map(|r| r.to_string()),
            probe: report.probe.as_ref().map(|p| ProbeOutput {
                reachable: p.success,
                response_time_ms: p.response_time_ms,
                status_code: p.status_code,
                error: p.error.clone(),
            }),
            attempts: report
                .attempts
                .iter()
                .map(|a| AttemptOutput {
                    credential: a.role.to_string(),
                    username: a.username.clone(),
                    success: a.success,
                    retries: a.retries,
                    duration_ms: u64::try_from(a.duration.as_millis()).unwrap_or(u64::MAX),
                    error: a.error.clone(),
                })
                .collect(),
            error: report.error.as_ref().map(ToString::to_string),
        };
        self.format(&output)
    }

    /// Builds a summary output.
    pub fn summary_to_output(&self, summary: &StatusSummary) -> SummaryOutput {
        SummaryOutput {
            execution_id: summary.execution_id.to_string(),
            started_at: summary.started_at,
            total: summary.total(),
            status_counts: counts_map(&summary.counts),
        }
    }

    /// Formats the latest run's counts, or `null` when nothing is stored.
    pub fn format_summary(&self, summary: Option<&StatusSummary>) -> Result<String> {
        self.format(&summary.map(|s| self.summary_to_output(s)))
    }

    /// Formats per-run counts.
    pub fn format_trend(&self, trend: &[StatusSummary]) -> Result<String> {
        let outputs: Vec<SummaryOutput> = trend.iter().map(|s| self.summary_to_output(s)).collect();
        self.format(&outputs)
    }

    /// Formats execution records as stored.
    pub fn format_history(&self, records: &[ExecutionRecord]) -> Result<String> {
        self.format(&records)
    }
}

fn batch_to_output(batch: &BatchSummary) -> BatchOutput {
    BatchOutput {
        batch_number: batch.batch_number,
        requested: batch.requested,
        successful: batch.successful,
        failed: batch.failed,
        retries: batch.retries,
        timed_out: batch.timed_out,
        persisted: batch.persisted,
        duration_ms: batch.duration_ms,
        error: batch.error.clone(),
    }
}

// ============================================================================
// Tests
// ============================================================================
