//! Text output formatting with progress bars and colors.
//!
//! The only place timestamps are converted to local time.

use atmwatch_core::{CanonicalStatus, ExecutionRecord, StatusCounts};
use atmwatch_fetch::{BatchSummary, RunReport};
use atmwatch_store::StatusSummary;
use chrono::{DateTime, Local, Utc};

use crate::commands::check::CheckReport;

// ============================================================================
// ANSI Colors
// ============================================================================

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

// Progress bar characters
const BAR_FULL: char = '█';
const BAR_EMPTY: char = '░';

/// Text formatter with optional colors.
pub struct TextFormatter {
    use_colors: bool,
    bar_width: usize,
}

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new(use_colors: bool) -> Self {
        Self {
            use_colors,
            bar_width: 10,
        }
    }

    // ------------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------------

    /// Formats a finished run: one line per batch, then the aggregate.
    pub fn format_run(&self, report: &RunReport) -> String {
        let exec = &report.execution;
        let combined = &report.combined;
        let mut lines = Vec::new();

        lines.push(format!(
            "{} {}",
            self.bold("Run"),
            self.dim(&exec.execution_id.to_string())
        ));
        lines.push(format!(
            "Started: {}  Credential: {}",
            format_local(exec.started_at),
            report.role
        ));

        if let Some(probe) = &report.probe {
            let status = if probe.success {
                self.green(&format!("reachable ({} ms)", probe.response_time_ms))
            } else {
                self.yellow(probe.error.as_deref().unwrap_or("server error"))
            };
            lines.push(format!("Upstream: {status}"));
        }

        lines.push(String::new());
        for batch in &report.batches {
            lines.push(self.format_batch_line(batch));
        }
        if !report.batches.is_empty() {
            lines.push(String::new());
        }

        let rate = combined.success_rate();
        lines.push(format!(
            "{:<12} {} {}",
            "Success:",
            self.progress_bar(rate),
            self.color_for_rate(rate, &format!("{rate:.1}%"))
        ));
        lines.push(format!(
            "{:<12} {} ok, {} failed, {} total",
            "Terminals:",
            combined.metadata.successful_retrievals,
            combined.metadata.failed_retrievals,
            combined.total_terminals()
        ));
        lines.push(format!(
            "{:<12} {}/{} succeeded",
            "Batches:", combined.successful_batches, combined.total_batches
        ));
        if !combined.failed_batches.is_empty() {
            let failed: Vec<String> = combined.failed_batches.iter().map(u32::to_string).collect();
            lines.push(format!("{:<12} {}", "Failed:", self.red(&failed.join(", "))));
        }
        lines.push(format!(
            "{:<12} {} retries, {} token refreshes",
            "Recovery:", exec.retries_performed, combined.metadata.token_refreshes
        ));
        if let Some(ms) = exec.duration_ms {
            lines.push(format!("{:<12} {}", "Duration:", format_duration_ms(ms)));
        }

        let status_lines = self.format_counts(&combined.metadata.status_counts);
        if !status_lines.is_empty() {
            lines.push(String::new());
            lines.push(self.bold("Status"));
            lines.extend(status_lines);
        }

        lines.push(String::new());
        lines.push(if exec.success {
            self.green("✓ Run completed")
        } else {
            let reason = exec.error.as_deref().unwrap_or("run failed");
            self.red(&format!("✗ {reason}"))
        });

        lines.join("\n")
    }

    /// Formats one batch line.
    pub fn format_batch_line(&self, batch: &BatchSummary) -> String {
        let label = format!("Batch {:>3}", batch.batch_number);
        let counts = format!("{:>4}/{:<4}", batch.successful, batch.requested);
        let timing = self.dim(&format_duration_ms(batch.duration_ms));

        let mut line = if let Some(error) = &batch.error {
            format!("{label}  {}  {}", self.red("✗ failed"), self.red(error))
        } else if batch.failed > 0 || batch.timed_out {
            format!("{label}  {}  {counts}  {timing}", self.yellow("! partial"))
        } else {
            format!("{label}  {}  {counts}  {timing}", self.green("✓ ok     "))
        };

        if batch.retries > 0 {
            line.push_str(&format!("  {} retries", batch.retries));
        }
        if batch.timed_out {
            line.push_str(&format!("  {}", self.yellow("timed out")));
        }
        if !batch.persisted {
            line.push_str(&format!("  {}", self.red("not saved")));
        }
        line
    }

    // ------------------------------------------------------------------------
    // Check
    // ------------------------------------------------------------------------

    /// Formats a connectivity/credential check.
    pub fn format_check(&self, report: &CheckReport) -> String {
        let mut lines = Vec::new();

        if report.demo {
            lines.push(format!("{} {}", self.bold("Upstream:"), self.dim("demo mode")));
        } else {
            lines.push(format!("{} {}", self.bold("Upstream:"), self.cyan(&report.base_url)));
        }

        if let Some(probe) = &report.probe {
            let line = match (probe.success, probe.status_code) {
                (true, Some(code)) => {
                    self.green(&format!("✓ HTTP {code} in {} ms", probe.response_time_ms))
                }
                (false, Some(code)) => self.red(&format!("✗ HTTP {code}")),
                _ => self.red(&format!(
                    "✗ {}",
                    probe.error.as_deref().unwrap_or("unreachable")
                )),
            };
            lines.push(format!("{:<12} {line}", "Probe:"));
        }

        for attempt in &report.attempts {
            let status = if attempt.success {
                self.green("✓ accepted")
            } else {
                self.red(&format!(
                    "✗ {}",
                    attempt.error.as_deref().unwrap_or("rejected")
                ))
            };
            lines.push(format!(
                "{:<12} {} {}",
                format!("{}:", attempt.role),
                attempt.username,
                status
            ));
        }

        lines.push(match (&report.role, &report.error) {
            (Some(role), _) => self.green(&format!("✓ Authenticated with {role} credential")),
            (None, Some(err)) => self.red(&format!("✗ {err}")),
            (None, None) => self.red("✗ Not authenticated"),
        });

        lines.join("\n")
    }

    // ------------------------------------------------------------------------
    // Summary / Trend / History
    // ------------------------------------------------------------------------

    /// Formats the latest run's status counts.
    pub fn format_summary(&self, summary: Option<&StatusSummary>) -> String {
        let Some(summary) = summary else {
            return self.dim("No runs recorded yet.");
        };

        let mut lines = vec![
            format!(
                "{} {}",
                self.bold("Latest run"),
                self.dim(&summary.execution_id.to_string())
            ),
            format!("Started: {}", format_local(summary.started_at)),
            String::new(),
        ];
        lines.extend(self.format_counts(&summary.counts));
        lines.push(format!("{:<16} {:>6}", self.bold("Total"), summary.total()));

        lines.join("\n")
    }

    /// Formats per-run counts, oldest first.
    pub fn format_trend(&self, trend: &[StatusSummary]) -> String {
        if trend.is_empty() {
            return self.dim("No runs recorded yet.");
        }

        let statuses = CanonicalStatus::all();
        let mut header = format!("{:<20}", "Run started");
        for status in statuses {
            header.push_str(&format!(" {:>6}", short_label(*status)));
        }
        header.push_str(&format!(" {:>6}", "Total"));

        let mut lines = vec![self.bold(&header)];
        for point in trend {
            let mut line = format!("{:<20}", format_local(point.started_at));
            for status in statuses {
                line.push_str(&format!(" {:>6}", point.counts.get(*status)));
            }
            line.push_str(&format!(" {:>6}", point.total()));
            lines.push(line);
        }

        lines.join("\n")
    }

    /// Formats recent execution records, newest first.
    pub fn format_history(&self, records: &[ExecutionRecord]) -> String {
        if records.is_empty() {
            return self.dim("No runs recorded yet.");
        }

        let mut lines = Vec::new();
        for record in records {
            let status = if record.success {
                self.green("✓")
            } else if record.is_finalized() {
                self.red("✗")
            } else {
                self.yellow("…")
            };

            let duration = record
                .duration_ms
                .map_or_else(|| "running".to_string(), format_duration_ms);

            let mut line = format!(
                "{status} {}  {:>5}/{:<5} terminals  {:>3} batches  {}",
                format_local(record.started_at),
                record.successful_retrievals,
                record.total_terminals,
                record.successful_batches + record.failed_batches,
                self.dim(&duration)
            );
            if let Some(error) = &record.error {
                line.push_str(&format!("  {}", self.red(error)));
            }
            lines.push(line);
        }

        lines.join("\n")
    }

    fn format_counts(&self, counts: &StatusCounts) -> Vec<String> {
        counts
            .iter()
            .map(|(status, n)| format!("{:<16} {n:>6}", self.color_for_status(status)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Formats a progress bar.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn progress_bar(&self, percent: f64) -> String {
        let percent = percent.clamp(0.0, 100.0);
        let filled = ((percent / 100.0) * self.bar_width as f64).round() as usize;
        let empty = self.bar_width.saturating_sub(filled);

        let bar = format!(
            "{}{}",
            BAR_FULL.to_string().repeat(filled),
            BAR_EMPTY.to_string().repeat(empty)
        );

        self.color_for_rate(percent, &bar)
    }

    fn color_for_rate(&self, percent: f64, text: &str) -> String {
        if !self.use_colors {
            return text.to_string();
        }

        if percent >= 90.0 {
            format!("{GREEN}{text}{RESET}")
        } else if percent >= 50.0 {
            format!("{YELLOW}{text}{RESET}")
        } else {
            format!("{RED}{text}{RESET}")
        }
    }

    fn color_for_status(&self, status: CanonicalStatus) -> String {
        let padded = format!("{:<16}", status.label());
        match status {
            CanonicalStatus::Available => self.green(&padded),
            CanonicalStatus::Warning | CanonicalStatus::Wounded => self.yellow(&padded),
            CanonicalStatus::Zombie | CanonicalStatus::OutOfService => self.red(&padded),
            CanonicalStatus::Unknown => self.dim(&padded),
        }
    }

    fn bold(&self, text: &str) -> String {
        self.paint(BOLD, text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint(DIM, text)
    }

    fn green(&self, text: &str) -> String {
        self.paint(GREEN, text)
    }

    fn yellow(&self, text: &str) -> String {
        self.paint(YELLOW, text)
    }

    fn red(&self, text: &str) -> String {
        self.paint(RED, text)
    }

    fn cyan(&self, text: &str) -> String {
        self.paint(CYAN, text)
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.use_colors {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

/// Converts a UTC timestamp to local time for display.
pub fn format_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Formats milliseconds as `850 ms`, `12.3 s` or `4m 05s`.
#[allow(clippy::cast_precision_loss)]
pub fn format_duration_ms(ms: i64) -> String {
    if ms < 1_000 {
        format!("{ms} ms")
    } else if ms < 60_000 {
        format!("{:.1} s", ms as f64 / 1000.0)
    } else {
        let secs = ms / 1000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

fn short_label(status: CanonicalStatus) -> &'static str {
    match status {
        CanonicalStatus::Available => "AVAIL",
        CanonicalStatus::Warning => "WARN",
        CanonicalStatus::Wounded => "WOUND",
        CanonicalStatus::Zombie => "ZOMB",
        CanonicalStatus::OutOfService => "OOS",
        CanonicalStatus::Unknown => "UNK",
    }
}

// ============================================================================
// Tests
// ============================================================================
