//! Canonical terminal status and the shared status normalizer.
//!
//! The upstream reports terminal state using its own vocabulary
//! (`HARD`, `CASH`, `UNAVAILABLE`, ...). Every consumer that stores,
//! counts, or trends status goes through [`normalize`] so the mapping
//! is applied exactly once and identically everywhere.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// Canonical Status
// ============================================================================

/// Canonical status taxonomy used by storage and reporting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalStatus {
    /// Terminal is fully operational.
    Available,
    /// Terminal is operational with a warning condition.
    Warning,
    /// Terminal is degraded (hardware or cash fault).
    Wounded,
    /// Terminal reports no activity and no faults.
    Zombie,
    /// Terminal is not serving customers.
    OutOfService,
    /// Upstream value could not be mapped.
    #[default]
    Unknown,
}

impl CanonicalStatus {
    /// Returns the storage/wire code for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Warning => "WARNING",
            Self::Wounded => "WOUNDED",
            Self::Zombie => "ZOMBIE",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Warning => "Warning",
            Self::Wounded => "Wounded",
            Self::Zombie => "Zombie",
            Self::OutOfService => "Out of Service",
            Self::Unknown => "Unknown",
        }
    }

    /// Returns a severity score (0 = healthy).
    pub fn severity(&self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Warning => 1,
            Self::Wounded => 2,
            Self::Zombie => 3,
            Self::OutOfService => 4,
            Self::Unknown => 5,
        }
    }

    /// Returns all statuses in order of severity.
    pub fn all() -> &'static [CanonicalStatus] {
        &[
            Self::Available,
            Self::Warning,
            Self::Wounded,
            Self::Zombie,
            Self::OutOfService,
            Self::Unknown,
        ]
    }

    /// Parses a canonical storage code (not an upstream value).
    pub fn from_code(code: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.as_str() == code)
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Normalizer
// ============================================================================

/// Fixed mapping from upstream status values to the canonical taxonomy.
///
/// Matching is case-insensitive and ignores surrounding whitespace.
const UPSTREAM_MAPPING: &[(&str, CanonicalStatus)] = &[
    ("AVAILABLE", CanonicalStatus::Available),
    ("WARNING", CanonicalStatus::Warning),
    ("WOUNDED", CanonicalStatus::Wounded),
    ("ZOMBIE", CanonicalStatus::Zombie),
    ("OUT_OF_SERVICE", CanonicalStatus::OutOfService),
    ("HARD", CanonicalStatus::Wounded),
    ("CASH", CanonicalStatus::Wounded),
    ("UNAVAILABLE", CanonicalStatus::OutOfService),
];

/// Upstream status codes searched when discovering the terminal universe.
pub const DEFAULT_STATUS_FILTERS: &[&str] = &[
    "AVAILABLE",
    "WARNING",
    "WOUNDED",
    "HARD",
    "CASH",
    "UNAVAILABLE",
    "ZOMBIE",
];

/// Maps an upstream status to its canonical value without side effects.
///
/// Returns `None` for values outside the documented mapping.
pub fn try_normalize(raw_status: &str) -> Option<CanonicalStatus> {
    let key = raw_status.trim();
    UPSTREAM_MAPPING
        .iter()
        .find(|(upstream, _)| upstream.eq_ignore_ascii_case(key))
        .map(|(_, canonical)| *canonical)
}

/// Maps an upstream status to the canonical taxonomy.
///
/// Unrecognized values map to [`CanonicalStatus::Unknown`] and are logged
/// as anomalies. This never fails.
pub fn normalize(raw_status: &str) -> CanonicalStatus {
    try_normalize(raw_status).unwrap_or_else(|| {
        warn!(raw_status = %raw_status, "Unrecognized upstream status, mapping to UNKNOWN");
        CanonicalStatus::Unknown
    })
}

// ============================================================================
// Status Counts
// ============================================================================

/// Counts of terminals per canonical status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    counts: BTreeMap<CanonicalStatus, usize>,
}

impl StatusCounts {
    /// Creates empty counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds counts from raw upstream values, normalizing each one.
    pub fn from_raw<'a>(raw: impl IntoIterator<Item = &'a str>) -> Self {
        let mut counts = Self::new();
        for value in raw {
            counts.record(normalize(value));
        }
        counts
    }

    /// Increments the count for a status.
    pub fn record(&mut self, status: CanonicalStatus) {
        *self.counts.entry(status).or_insert(0) += 1;
    }

    /// Adds `n` to the count for a status.
    pub fn add(&mut self, status: CanonicalStatus, n: usize) {
        *self.counts.entry(status).or_insert(0) += n;
    }

    /// Merges another set of counts into this one.
    pub fn merge(&mut self, other: &StatusCounts) {
        for (status, n) in &other.counts {
            self.add(*status, *n);
        }
    }

    /// Returns the count for a status.
    pub fn get(&self, status: CanonicalStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Returns the total number of terminals counted.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Iterates non-zero counts in severity order.
    pub fn iter(&self) -> impl Iterator<Item = (CanonicalStatus, usize)> + '_ {
        self.counts.iter().map(|(s, n)| (*s, *n))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_mapping() {
        assert_eq!(normalize("HARD"), CanonicalStatus::Wounded);
        assert_eq!(normalize("CASH"), CanonicalStatus::Wounded);
        assert_eq!(normalize("UNAVAILABLE"), CanonicalStatus::OutOfService);
    }

    #[test]
    fn test_identity_mapping() {
        for status in CanonicalStatus::all() {
            if *status == CanonicalStatus::Unknown {
                continue;
            }
            assert_eq!(normalize(status.as_str()), *status);
        }
    }

    #[test]
    fn test_unrecognized_maps_to_unknown() {
        assert_eq!(normalize("FOO"), CanonicalStatus::Unknown);
        assert_eq!(normalize(""), CanonicalStatus::Unknown);
        assert_eq!(try_normalize("FOO"), None);
    }

    #[test]
    fn test_normalize_is_stable() {
        for raw in ["HARD", "cash", " available ", "FOO", "ZOMBIE"] {
            let first = normalize(raw);
            for _ in 0..5 {
                assert_eq!(normalize(raw), first);
            }
        }
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(normalize("hard"), CanonicalStatus::Wounded);
        assert_eq!(normalize("  Out_Of_Service\n"), CanonicalStatus::OutOfService);
    }

    #[test]
    fn test_serde_codes() {
        let json = serde_json::to_string(&CanonicalStatus::OutOfService).unwrap();
        assert_eq!(json, "\"OUT_OF_SERVICE\"");
        assert_eq!(
            CanonicalStatus::from_code("OUT_OF_SERVICE"),
            Some(CanonicalStatus::OutOfService)
        );
        assert_eq!(CanonicalStatus::from_code("HARD"), None);
    }

    #[test]
    fn test_status_counts_from_raw() {
        let counts = StatusCounts::from_raw(["HARD", "CASH", "AVAILABLE", "FOO"]);
        assert_eq!(counts.get(CanonicalStatus::Wounded), 2);
        assert_eq!(counts.get(CanonicalStatus::Available), 1);
        assert_eq!(counts.get(CanonicalStatus::Unknown), 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_status_counts_merge() {
        let mut a = StatusCounts::from_raw(["HARD"]);
        let b = StatusCounts::from_raw(["WOUNDED", "ZOMBIE"]);
        a.merge(&b);
        assert_eq!(a.get(CanonicalStatus::Wounded), 2);
        assert_eq!(a.get(CanonicalStatus::Zombie), 1);
    }
}
