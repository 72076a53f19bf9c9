//! Run totals and the final summary.

use std::collections::HashMap;
use tokio::time::Duration;
use tracing::warn;

use crate::errors::ErrorCategory;
use crate::outcome::Outcome;
use crate::percentiles::{LatencyHistogram, LatencyStats};

/// Final report of a run, handed to the recorder and returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total_budget: u64,
    pub sent: u64,
    pub completed: u64,
    pub successes: u64,
    pub failures: u64,
    /// Non-zero failure counts, in [`ErrorCategory::all`] order.
    pub errors_by_category: Vec<(ErrorCategory, u64)>,
    pub latency: Option<LatencyStats>,
    pub log_write_errors: u64,
    pub elapsed: Duration,
    /// True when the run was stopped before the budget was dispatched.
    pub cancelled: bool,
}

impl RunSummary {
    /// The one-line summary written as the last log entry.
    pub fn summary_line(&self) -> String {
        format!(
            "Test completed. Total sent: {}, Completed: {}.",
            self.sent, self.completed
        )
    }

    /// Multi-line report for the console.
    pub fn format_report(&self) -> String {
        let mut lines = vec![
            self.summary_line(),
            format!(
                "  Successes: {}, Failures: {}, Duration: {:.1}s",
                self.successes,
                self.failures,
                self.elapsed.as_secs_f64()
            ),
        ];
        for (category, count) in &self.errors_by_category {
            lines.push(format!("  {}: {}", category.description(), count));
        }
        if let Some(latency) = &self.latency {
            lines.push(format!("  Latency: {}", latency.format()));
        }
        if self.log_write_errors > 0 {
            lines.push(format!(
                "  WARNING: {} result log writes failed",
                self.log_write_errors
            ));
        }
        if self.cancelled {
            lines.push(format!(
                "  Run was cancelled before dispatching its budget of {}",
                self.total_budget
            ));
        }
        lines.join("\n")
    }
}

/// Accumulates per-outcome statistics inside the collector.
pub struct RunStats {
    successes: u64,
    failures: u64,
    by_category: HashMap<ErrorCategory, u64>,
    latency: Option<LatencyHistogram>,
    log_write_errors: u64,
}

impl RunStats {
    pub fn new() -> Self {
        let latency = match LatencyHistogram::new() {
            Ok(hist) => Some(hist),
            Err(e) => {
                warn!(error = ?e, "Latency histogram unavailable, percentiles disabled");
                None
            }
        };

        Self {
            successes: 0,
            failures: 0,
            by_category: HashMap::new(),
            latency,
            log_write_errors: 0,
        }
    }

    pub fn observe(&mut self, outcome: &Outcome) {
        match outcome.status.error_category() {
            Some(category) => {
                self.failures += 1;
                *self.by_category.entry(category).or_insert(0) += 1;
            }
            None => self.successes += 1,
        }
        if let Some(hist) = self.latency.as_mut() {
            hist.record_ms(outcome.elapsed_ms);
        }
    }

    pub fn log_write_failed(&mut self) {
        self.log_write_errors += 1;
    }

    pub fn into_summary(
        self,
        total_budget: u64,
        sent: u64,
        completed: u64,
        elapsed: Duration,
        cancelled: bool,
    ) -> RunSummary {
        let errors_by_category = ErrorCategory::all()
            .into_iter()
            .filter_map(|c| self.by_category.get(&c).map(|n| (c, *n)))
            .collect();

        RunSummary {
            total_budget,
            sent,
            completed,
            successes: self.successes,
            failures: self.failures,
            errors_by_category,
            latency: self.latency.as_ref().and_then(LatencyHistogram::stats),
            log_write_errors: self.log_write_errors,
            elapsed,
            cancelled,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeStatus;
    use serde_json::Value;

    fn outcome(seq: u64, status: OutcomeStatus, elapsed_ms: u64) -> Outcome {
        Outcome {
            sequence_number: seq,
            status,
            body: Value::Null,
            elapsed_ms,
        }
    }

    #[test]
    fn stats_split_successes_and_failures() {
        let mut stats = RunStats::new();
        stats.observe(&outcome(1, OutcomeStatus::Success { code: 200 }, 10));
        stats.observe(&outcome(2, OutcomeStatus::Success { code: 404 }, 20));
        stats.observe(&outcome(
            3,
            OutcomeStatus::Failure {
                code: None,
                category: ErrorCategory::TimeoutError,
            },
            30,
        ));
        stats.observe(&outcome(4, OutcomeStatus::Success { code: 500 }, 40));

        let summary = stats.into_summary(4, 4, 4, Duration::from_secs(1), false);

        assert_eq!(summary.successes, 1);
        assert_eq!(summary.failures, 3);
        assert_eq!(
            summary.errors_by_category,
            vec![
                (ErrorCategory::ClientError, 1),
                (ErrorCategory::ServerError, 1),
                (ErrorCategory::TimeoutError, 1),
            ]
        );
        assert_eq!(summary.latency.as_ref().unwrap().count, 4);
    }

    #[test]
    fn summary_line_reports_totals() {
        let summary = RunStats::new().into_summary(1000, 1000, 1000, Duration::ZERO, false);

        assert_eq!(
            summary.summary_line(),
            "Test completed. Total sent: 1000, Completed: 1000."
        );
        assert!(summary.latency.is_none());
    }

    #[test]
    fn report_mentions_cancellation_and_write_errors() {
        let mut stats = RunStats::new();
        stats.log_write_failed();
        let summary = stats.into_summary(100, 10, 10, Duration::from_secs(2), true);

        let report = summary.format_report();

        assert!(report.starts_with("Test completed. Total sent: 10, Completed: 10."));
        assert!(report.contains("1 result log writes failed"));
        assert!(report.contains("cancelled"));
    }
}
