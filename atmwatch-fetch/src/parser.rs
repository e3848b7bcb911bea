//! Upstream payload parsing.
//!
//! The upstream wraps most responses in a `{header, body}` envelope where
//! `body` is either an object or a one-element list. Field names drift
//! between upstream versions, so the payload structs accept the known
//! aliases.

use atmwatch_core::{CashCassette, Terminal, TerminalDetail};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;

// ============================================================================
// Payload Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct DetailPayload {
    #[serde(default, alias = "terminalId")]
    terminal_id: Option<String>,
    #[serde(default, alias = "issue_state_name", alias = "status")]
    issue_state_code: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, alias = "serialNumber")]
    serial_number: Option<String>,
    #[serde(default, alias = "fault_data")]
    fault: Option<Value>,
    #[serde(default, alias = "cash_information")]
    cassettes: Vec<CassettePayload>,
}

#[derive(Debug, Deserialize)]
struct CassettePayload {
    #[serde(default, alias = "cassette_number", alias = "id")]
    cassette_id: Option<Value>,
    #[serde(default)]
    denomination: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, alias = "count", alias = "notes_remaining")]
    note_count: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

impl CassettePayload {
    fn into_cassette(self, index: usize) -> CashCassette {
        let cassette_id = match self.cassette_id {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => format!("{}", index + 1),
        };
        CashCassette {
            cassette_id,
            denomination: self.denomination,
            currency: self.currency,
            note_count: self.note_count,
            status: self.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    #[serde(default, alias = "terminalId")]
    terminal_id: Option<String>,
    #[serde(default, alias = "issue_state_name", alias = "status")]
    issue_state_code: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, alias = "serialNumber")]
    serial_number: Option<String>,
}

// ============================================================================
// Envelope
// ============================================================================

/// Returns the record inside the envelope, or the payload itself.
fn unwrap_envelope(payload: &Value) -> Option<&Value> {
    let body = payload.get("body").unwrap_or(payload);
    match body {
        Value::Object(_) => Some(body),
        Value::Array(items) => items.first().filter(|v| v.is_object()),
        _ => None,
    }
}

/// Returns the list of rows inside the envelope.
fn unwrap_rows(payload: &Value) -> Option<&Vec<Value>> {
    let body = payload.get("body").unwrap_or(payload);
    match body {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get("terminals")
            .or_else(|| map.get("results"))
            .and_then(Value::as_array),
        _ => None,
    }
}

// ============================================================================
// Parsers
// ============================================================================

/// Parses a terminal-detail payload.
///
/// The canonical status goes through the shared normalizer; when the payload
/// carries no status, the terminal's last-known status is used. The raw
/// payload is kept on the record.
pub fn parse_terminal_detail(
    terminal: &Terminal,
    payload: Value,
) -> Result<TerminalDetail, FetchError> {
    let record = unwrap_envelope(&payload).ok_or_else(|| {
        FetchError::MalformedResponse(format!(
            "terminal {}: expected an object body",
            terminal.terminal_id
        ))
    })?;

    let parsed: DetailPayload = serde_json::from_value(record.clone()).map_err(|e| {
        FetchError::MalformedResponse(format!("terminal {}: {e}", terminal.terminal_id))
    })?;

    if let Some(id) = parsed.terminal_id.as_deref() {
        if id != terminal.terminal_id {
            return Err(FetchError::MalformedResponse(format!(
                "requested terminal {} but payload describes {id}",
                terminal.terminal_id
            )));
        }
    }

    let raw_status = parsed
        .issue_state_code
        .as_deref()
        .or(terminal.issue_state_code.as_deref());

    let mut detail = TerminalDetail::new(terminal.terminal_id.clone(), raw_status);
    detail.location = parsed.location.or_else(|| terminal.location.clone());
    detail.serial_number = parsed
        .serial_number
        .or_else(|| terminal.serial_number.clone());
    detail.fault = parsed.fault.filter(|f| !f.is_null());
    detail.cassettes = parsed
        .cassettes
        .into_iter()
        .enumerate()
        .map(|(i, c)| c.into_cassette(i))
        .collect();
    detail.raw_payload = payload;

    debug!(
        terminal_id = %detail.terminal_id,
        status = %detail.status,
        cassettes = detail.cassettes.len(),
        "Parsed terminal detail"
    );
    Ok(detail)
}

/// Parses a dashboard-search payload into terminals.
///
/// Rows without a terminal id are skipped with a warning.
pub fn parse_search_results(payload: &Value) -> Result<Vec<Terminal>, FetchError> {
    let rows = unwrap_rows(payload).ok_or_else(|| {
        FetchError::MalformedResponse("dashboard search: expected a list body".to_string())
    })?;

    let mut terminals = Vec::with_capacity(rows.len());
    for row in rows {
        let parsed: SearchRow = match serde_json::from_value(row.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable search row");
                continue;
            }
        };

        let Some(terminal_id) = parsed.terminal_id.filter(|id| !id.trim().is_empty()) else {
            warn!("Skipping search row without terminal id");
            continue;
        };

        terminals.push(Terminal {
            terminal_id,
            issue_state_code: parsed.issue_state_code,
            location: parsed.location,
            serial_number: parsed.serial_number,
        });
    }
    Ok(terminals)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use atmwatch_core::CanonicalStatus;
    use serde_json::json;

    #[test]
    fn test_parse_enveloped_detail() {
        let payload = json!({
            "header": { "result_code": "000" },
            "body": [{
                "terminal_id": "T1",
                "issue_state_name": "CASH",
                "location": "Main St",
                "fault_data": { "component": "dispenser" },
                "cash_information": [
                    { "cassette_number": 1, "denomination": 20.0, "currency": "EUR", "count": 100 },
                    { "cassette_id": "C2", "denomination": 50.0, "note_count": 10 }
                ]
            }]
        });

        let detail = parse_terminal_detail(&Terminal::new("T1"), payload.clone()).unwrap();
        assert_eq!(detail.status, CanonicalStatus::Wounded);
        assert_eq!(detail.raw_status.as_deref(), Some("CASH"));
        assert_eq!(detail.location.as_deref(), Some("Main St"));
        assert_eq!(detail.cassettes.len(), 2);
        assert_eq!(detail.cassettes[0].cassette_id, "1");
        assert_eq!(detail.cassettes[1].cassette_id, "C2");
        assert_eq!(detail.cassettes[0].note_count, Some(100));
        assert!(detail.fault.is_some());
        assert_eq!(detail.raw_payload, payload);
        assert!(detail.is_success());
    }

    #[test]
    fn test_unrecognized_status_kept_as_unknown() {
        let payload = json!({ "terminal_id": "T9", "status": "FOO" });
        let detail = parse_terminal_detail(&Terminal::new("T9"), payload).unwrap();
        assert_eq!(detail.status, CanonicalStatus::Unknown);
        assert_eq!(detail.raw_status.as_deref(), Some("FOO"));
    }

    #[test]
    fn test_missing_status_uses_last_known() {
        let terminal = Terminal::new("T2").with_status("UNAVAILABLE");
        let detail = parse_terminal_detail(&terminal, json!({ "body": {} })).unwrap();
        assert_eq!(detail.status, CanonicalStatus::OutOfService);
    }

    #[test]
    fn test_non_object_body_is_malformed() {
        let result = parse_terminal_detail(&Terminal::new("T1"), json!({ "body": "oops" }));
        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));

        let result = parse_terminal_detail(&Terminal::new("T1"), json!({ "body": [] }));
        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
    }

    #[test]
    fn test_wrong_field_type_is_malformed() {
        let payload = json!({ "terminal_id": "T1", "cash_information": "none" });
        let result = parse_terminal_detail(&Terminal::new("T1"), payload);
        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
    }

    #[test]
    fn test_mismatched_terminal_is_malformed() {
        let payload = json!({ "terminal_id": "OTHER" });
        let result = parse_terminal_detail(&Terminal::new("T1"), payload);
        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
    }

    #[test]
    fn test_parse_search_rows() {
        let payload = json!({
            "body": [
                { "terminal_id": "A1", "issue_state_name": "AVAILABLE", "location": "Airport" },
                { "location": "no id" },
                { "terminal_id": "  " },
                { "terminal_id": "B2", "issue_state_name": "HARD" }
            ]
        });
        let terminals = parse_search_results(&payload).unwrap();
        let ids: Vec<_> = terminals.iter().map(|t| t.terminal_id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "B2"]);
        assert_eq!(terminals[1].issue_state_code.as_deref(), Some("HARD"));
    }

    #[test]
    fn test_parse_search_nested_list() {
        let payload = json!({ "body": { "terminals": [{ "terminal_id": "X" }] } });
        assert_eq!(parse_search_results(&payload).unwrap().len(), 1);

        let result = parse_search_results(&json!({ "body": 3 }));
        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
    }
}
