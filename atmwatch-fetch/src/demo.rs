//! Offline terminal source.
//!
//! Produces a deterministic fleet so the rest of the pipeline can be run
//! end to end without reaching the upstream.

use std::time::Duration;

use async_trait::async_trait;
use atmwatch_core::{Session, Terminal, TerminalDetail};
use serde_json::json;

use crate::error::FetchError;
use crate::parser::parse_terminal_detail;
use crate::source::TerminalSource;

/// Upstream status codes cycled through by the demo fleet.
const DEMO_STATUSES: &[&str] = &[
    "AVAILABLE",
    "AVAILABLE",
    "WARNING",
    "HARD",
    "AVAILABLE",
    "CASH",
    "UNAVAILABLE",
    "ZOMBIE",
];

const DEMO_LOCATIONS: &[&str] = &[
    "Central Station",
    "Airport Terminal 2",
    "Harbour Mall",
    "University Campus",
    "Old Town Square",
];

/// Default fleet size.
pub const DEFAULT_DEMO_TERMINALS: usize = 14;

/// Synthetic terminal source.
#[derive(Debug, Clone)]
pub struct DemoSource {
    terminals: Vec<Terminal>,
    latency: Duration,
}

impl DemoSource {
    /// Creates a fleet of `count` terminals.
    pub fn new(count: usize) -> Self {
        let terminals = (0..count)
            .map(|i| Terminal {
                terminal_id: format!("DEMO{:04}", i + 1),
                issue_state_code: Some(DEMO_STATUSES[i % DEMO_STATUSES.len()].to_string()),
                location: Some(DEMO_LOCATIONS[i % DEMO_LOCATIONS.len()].to_string()),
                serial_number: Some(format!("SN-{:06}", 100_000 + i * 37)),
            })
            .collect();

        Self {
            terminals,
            latency: Duration::ZERO,
        }
    }

    /// Adds simulated latency to every detail fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns the whole fleet.
    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new(DEFAULT_DEMO_TERMINALS)
    }
}

#[async_trait]
impl TerminalSource for DemoSource {
    fn name(&self) -> &str {
        "demo"
    }

    async fn search(
        &self,
        _session: &Session,
        status_filter: &str,
    ) -> Result<Vec<Terminal>, FetchError> {
        Ok(self
            .terminals
            .iter()
            .filter(|t| {
                t.issue_state_code
                    .as_deref()
                    .is_some_and(|code| code.eq_ignore_ascii_case(status_filter))
            })
            .cloned()
            .collect())
    }

    async fn fetch_detail(
        &self,
        _session: &Session,
        terminal: &Terminal,
    ) -> Result<TerminalDetail, FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let seed = terminal
            .terminal_id
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        let status = terminal.issue_state_code.as_deref().unwrap_or("AVAILABLE");
        let fault = match status {
            "HARD" => json!({ "component": "dispenser", "code": "E-201" }),
            "CASH" => json!({ "component": "cassette", "code": "LOW-CASH" }),
            _ => serde_json::Value::Null,
        };

        let payload = json!({
            "header": { "result_code": "000", "demo": true },
            "body": [{
                "terminal_id": terminal.terminal_id,
                "issue_state_name": status,
                "location": terminal.location,
                "serial_number": terminal.serial_number,
                "fault_data": fault,
                "cash_information": [
                    { "cassette_number": 1, "denomination": 20.0, "currency": "EUR", "count": seed % 2000 },
                    { "cassette_number": 2, "denomination": 50.0, "currency": "EUR", "count": (seed / 7) % 1000 }
                ]
            }]
        });

        parse_terminal_detail(terminal, payload)
    }
}
