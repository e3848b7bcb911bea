//! Terminal types.
//!
//! - [`Terminal`] - A unit of work, as discovered on the upstream dashboard
//! - [`TerminalDetail`] - The enriched per-terminal record produced by a fetch
//! - [`CashCassette`] - One cash cassette inside a terminal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{CanonicalStatus, normalize};

// ============================================================================
// Terminal
// ============================================================================

/// An ATM tracked by the upstream, identified by `terminal_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    /// Upstream terminal identifier.
    pub terminal_id: String,
    /// Last-known upstream status code (raw, not normalized).
    #[serde(default)]
    pub issue_state_code: Option<String>,
    /// Installation location.
    #[serde(default)]
    pub location: Option<String>,
    /// Hardware serial number.
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl Terminal {
    /// Creates a terminal with only an identifier.
    pub fn new(terminal_id: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            issue_state_code: None,
            location: None,
            serial_number: None,
        }
    }

    /// Sets the last-known status code.
    pub fn with_status(mut self, code: impl Into<String>) -> Self {
        self.issue_state_code = Some(code.into());
        self
    }

    /// Sets the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

// ============================================================================
// Cash Cassette
// ============================================================================

/// A cash cassette as reported in the terminal detail payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashCassette {
    /// Cassette identifier or slot number.
    pub cassette_id: String,
    /// Note denomination.
    #[serde(default)]
    pub denomination: Option<f64>,
    /// Currency code.
    #[serde(default)]
    pub currency: Option<String>,
    /// Notes remaining.
    #[serde(default)]
    pub note_count: Option<i64>,
    /// Cassette status as reported upstream.
    #[serde(default)]
    pub status: Option<String>,
}

impl CashCassette {
    /// Returns the cash value held, if denomination and count are known.
    pub fn total_value(&self) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        match (self.denomination, self.note_count) {
            (Some(d), Some(n)) => Some(d * n as f64),
            _ => None,
        }
    }
}

// ============================================================================
// Terminal Detail
// ============================================================================

/// Enriched per-terminal record for one run.
///
/// A record with `failure` set is a placeholder for a terminal whose fetch
/// did not succeed. It keeps the terminal visible in the result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalDetail {
    /// Upstream terminal identifier.
    pub terminal_id: String,
    /// Canonical status.
    pub status: CanonicalStatus,
    /// Status value exactly as reported upstream.
    #[serde(default)]
    pub raw_status: Option<String>,
    /// Installation location.
    #[serde(default)]
    pub location: Option<String>,
    /// Hardware serial number.
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Fault payload (free-form).
    #[serde(default)]
    pub fault: Option<serde_json::Value>,
    /// Cash cassettes.
    #[serde(default)]
    pub cassettes: Vec<CashCassette>,
    /// When this record was retrieved (UTC).
    pub retrieved_at: DateTime<Utc>,
    /// Upstream payload this record was parsed from.
    #[serde(default)]
    pub raw_payload: serde_json::Value,
    /// Failure reason for placeholder records.
    #[serde(default)]
    pub failure: Option<String>,
}

impl TerminalDetail {
    /// Creates a successful record with the given raw status.
    pub fn new(terminal_id: impl Into<String>, raw_status: Option<&str>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            status: raw_status.map_or(CanonicalStatus::Unknown, normalize),
            raw_status: raw_status.map(str::to_string),
            location: None,
            serial_number: None,
            fault: None,
            cassettes: Vec::new(),
            retrieved_at: Utc::now(),
            raw_payload: serde_json::Value::Null,
            failure: None,
        }
    }

    /// Creates a failure placeholder for a terminal.
    ///
    /// The placeholder carries the terminal's last-known status.
    pub fn failed(terminal: &Terminal, reason: impl Into<String>) -> Self {
        let mut detail = Self::new(
            terminal.terminal_id.clone(),
            terminal.issue_state_code.as_deref(),
        );
        detail.location.clone_from(&terminal.location);
        detail.serial_number.clone_from(&terminal.serial_number);
        detail.failure = Some(reason.into());
        detail
    }

    /// Returns true if this record came from a successful fetch.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Returns the total cash value across cassettes with known values.
    pub fn total_cash(&self) -> f64 {
        self.cassettes.iter().filter_map(CashCassette::total_value).sum()
    }
}

// ============================================================================
// Terminal Outcome
// ============================================================================

/// Outcome of one terminal fetch, as reported to the execution logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// Detail retrieved.
    Success,
    /// Fetch failed with a reason.
    Failure(String),
}

impl TerminalOutcome {
    /// Derives the outcome from a detail record.
    pub fn of(detail: &TerminalDetail) -> Self {
        match &detail.failure {
            None => Self::Success,
            Some(reason) => Self::Failure(reason.clone()),
        }
    }

    /// Returns true if this is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
