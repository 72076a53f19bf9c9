//! Failure classification for request outcomes.
//!
//! Transport errors and HTTP status codes are sorted into a small set of
//! categories so the run summary and metrics can break failures down by
//! cause (client errors, server errors, network issues, timeouts).

use serde::Serialize;
use std::fmt;

/// Categories of failures a single request can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Target answered 4xx.
    ClientError,
    /// Target answered 5xx.
    ServerError,
    /// No usable connection: refused, reset, DNS failure, broken body.
    NetworkError,
    TimeoutError,
    TlsError,
    /// Anything else, including 1xx and 3xx answers.
    OtherError,
}

impl ErrorCategory {
    /// `None` for 2xx, the only range a run counts as success.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Timeouts win over everything else, then the status code if the error
    /// carries one, then reqwest's own error kind, then the message text.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }
        if let Some(status) = error.status() {
            if let Some(category) = Self::from_status_code(status.as_u16()) {
                return category;
            }
        }
        if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
            return ErrorCategory::NetworkError;
        }
        if error.is_redirect() {
            return ErrorCategory::ClientError;
        }

        Self::from_message(&error.to_string())
    }

    /// Fallback for errors whose kind says nothing useful.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("certificate") || msg.contains("tls") || msg.contains("ssl") {
            ErrorCategory::TlsError
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ErrorCategory::TimeoutError
        } else if msg.contains("dns")
            || msg.contains("resolve")
            || msg.contains("connect")
            || msg.contains("connection")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Metric label and JSONL value.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "Client errors (4xx)",
            ErrorCategory::ServerError => "Server errors (5xx)",
            ErrorCategory::NetworkError => "Network errors",
            ErrorCategory::TimeoutError => "Timeouts",
            ErrorCategory::TlsError => "TLS errors",
            ErrorCategory::OtherError => "Other errors",
        }
    }

    /// Report order.
    pub fn all() -> [ErrorCategory; 6] {
        use ErrorCategory::*;
        [ClientError, ServerError, NetworkError, TimeoutError, TlsError, OtherError]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
