//! The terminal result of one request attempt.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::errors::ErrorCategory;

/// Status text used when a failure carries no HTTP status.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The server answered, with any status code.
    Success { code: u16 },

    /// The transport failed; `code` is set when the failure still carried one.
    Failure {
        code: Option<u16>,
        category: ErrorCategory,
    },
}

impl OutcomeStatus {
    /// HTTP status code, if there is one.
    pub fn code(&self) -> Option<u16> {
        match self {
            OutcomeStatus::Success { code } => Some(*code),
            OutcomeStatus::Failure { code, .. } => *code,
        }
    }

    /// True for transport failures and for responses outside 2xx.
    pub fn is_failure(&self) -> bool {
        match self {
            OutcomeStatus::Success { code } => ErrorCategory::from_status_code(*code).is_some(),
            OutcomeStatus::Failure { .. } => true,
        }
    }

    /// Failure category, including non-2xx responses.
    pub fn error_category(&self) -> Option<ErrorCategory> {
        match self {
            OutcomeStatus::Success { code } => ErrorCategory::from_status_code(*code),
            OutcomeStatus::Failure { category, .. } => Some(*category),
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{}", code),
            None => f.write_str(UNKNOWN_ERROR),
        }
    }
}

/// Result of one dispatched request unit. Exactly one exists per unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub sequence_number: u64,
    pub status: OutcomeStatus,
    pub body: Value,
    pub elapsed_ms: u64,
}

impl Outcome {
    /// Outcome for a unit whose task died before producing a result.
    pub fn aborted(sequence_number: u64, reason: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            sequence_number,
            status: OutcomeStatus::Failure {
                code: None,
                category: ErrorCategory::OtherError,
            },
            body: Value::String(reason.into()),
            elapsed_ms,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_uses_code_or_sentinel() {
        assert_eq!(OutcomeStatus::Success { code: 201 }.to_string(), "201");
        assert_eq!(
            OutcomeStatus::Failure {
                code: Some(502),
                category: ErrorCategory::ServerError
            }
            .to_string(),
            "502"
        );
        assert_eq!(
            OutcomeStatus::Failure {
                code: None,
                category: ErrorCategory::NetworkError
            }
            .to_string(),
            "Unknown error"
        );
    }

    #[test]
    fn non_2xx_response_counts_as_failure() {
        assert!(!OutcomeStatus::Success { code: 200 }.is_failure());
        assert!(OutcomeStatus::Success { code: 404 }.is_failure());
        assert_eq!(
            OutcomeStatus::Success { code: 500 }.error_category(),
            Some(ErrorCategory::ServerError)
        );
    }

    #[test]
    fn aborted_outcome_is_unknown_failure() {
        let outcome = Outcome::aborted(7, "task panicked", 3);

        assert_eq!(outcome.sequence_number, 7);
        assert!(outcome.is_failure());
        assert_eq!(outcome.status.to_string(), UNKNOWN_ERROR);
        assert_eq!(outcome.body, Value::String("task panicked".into()));
    }

    #[test]
    fn serializes_with_tagged_status() {
        let outcome = Outcome {
            sequence_number: 1,
            status: OutcomeStatus::Success { code: 200 },
            body: serde_json::json!({"ok": true}),
            elapsed_ms: 12,
        };

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"]["kind"], "success");
        assert_eq!(value["status"]["code"], 200);
        assert_eq!(value["elapsed_ms"], 12);
    }
}
