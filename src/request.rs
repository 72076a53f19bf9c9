//! Request units and the transport boundary.
//!
//! A [`RequestUnit`] is one attempt: its sequence number, the payload the
//! generator produced for it, and the [`Transport`] that performs the call.
//! `execute` never fails; every attempt ends in exactly one [`Outcome`].

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ErrorCategory;
use crate::outcome::{Outcome, OutcomeStatus};
use crate::payload::Payload;
use crate::recorder::LogPolicy;

/// A response from the target, whatever its status code.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

/// A transport-level failure (timeout, refused connection, DNS, broken body).
#[derive(Error, Debug, Clone)]
#[error("[{}] {message}", .category.label())]
pub struct TransportError {
    pub category: ErrorCategory,

    /// HTTP status, when the failure happened after the response head arrived.
    pub status: Option<u16>,

    /// Server error body, when one was received.
    pub body: Option<Value>,

    pub message: String,
}

impl TransportError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status: None,
            body: None,
            message: message.into(),
        }
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(error),
            status: error.status().map(|s| s.as_u16()),
            body: None,
            message: error.to_string(),
        }
    }
}

/// Performs one call against the target.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &Payload) -> Result<TransportResponse, TransportError>;
}

/// HTTP method used by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(format!("Unsupported request type '{}'. Use GET or POST.", other)),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        })
    }
}

/// reqwest-backed transport for GET and POST runs.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    method: HttpMethod,
    token: Option<String>,
    policy: LogPolicy,
}

impl HttpTransport {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        method: HttpMethod,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            method,
            token,
            policy: LogPolicy::All,
        }
    }

    /// Bodies the result log will never show are drained, not decoded.
    pub fn with_log_policy(mut self, policy: LogPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn build_request(&self, payload: &Payload) -> reqwest::RequestBuilder {
        let mut req = match self.method {
            HttpMethod::Get => self.client.get(&self.url),
            HttpMethod::Post => self.client.post(&self.url),
        };
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        match payload {
            Payload::None => req,
            Payload::Query(pairs) => req.query(pairs),
            Payload::Json(body) => req.json(body),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload) -> Result<TransportResponse, TransportError> {
        let mut response = self
            .build_request(payload)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let body_error = |e: reqwest::Error| {
            let mut err = TransportError::from_reqwest(&e);
            err.status = Some(status);
            err
        };

        if !self.policy.keeps_body(status) {
            // Read the body to completion in chunks without buffering it.
            while response.chunk().await.map_err(body_error)?.is_some() {}
            return Ok(TransportResponse {
                status,
                body: Value::Null,
            });
        }

        let bytes = response.bytes().await.map_err(body_error)?;

        Ok(TransportResponse {
            status,
            body: decode_body(&bytes),
        })
    }
}

/// JSON bodies are kept structured; anything else is kept as text.
pub fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// One request attempt. Immutable once built.
pub struct RequestUnit {
    sequence_number: u64,
    payload: Payload,
    transport: Arc<dyn Transport>,
}

impl RequestUnit {
    pub fn new(sequence_number: u64, payload: Payload, transport: Arc<dyn Transport>) -> Self {
        Self {
            sequence_number,
            payload,
            transport,
        }
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Performs the call and classifies the result.
    ///
    /// Elapsed time runs from just before the call until the body is read or
    /// the error surfaces, for successes and failures alike.
    pub async fn execute(self) -> Outcome {
        let start = Instant::now();
        let result = self.transport.send(&self.payload).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                debug!(
                    seq = self.sequence_number,
                    status_code = response.status,
                    elapsed_ms,
                    "Request completed"
                );
                Outcome {
                    sequence_number: self.sequence_number,
                    status: OutcomeStatus::Success {
                        code: response.status,
                    },
                    body: response.body,
                    elapsed_ms,
                }
            }
            Err(e) => {
                warn!(
                    seq = self.sequence_number,
                    error = %e,
                    error_category = e.category.label(),
                    elapsed_ms,
                    "Request failed"
                );
                Outcome {
                    sequence_number: self.sequence_number,
                    status: OutcomeStatus::Failure {
                        code: e.status,
                        category: e.category,
                    },
                    body: e.body.unwrap_or(Value::String(e.message)),
                    elapsed_ms,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::time::Duration;

    struct FixedTransport {
        result: Result<TransportResponse, TransportError>,
        delay: Duration,
        seen: Mutex<Vec<Payload>>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, payload: &Payload) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(payload.clone());
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn unit(result: Result<TransportResponse, TransportError>, delay: Duration) -> (RequestUnit, Arc<FixedTransport>) {
        let transport = Arc::new(FixedTransport {
            result,
            delay,
            seen: Mutex::new(Vec::new()),
        });
        let payload = Payload::Json(json!({"key1": "value1", "key3": 4}));
        (RequestUnit::new(9, payload, transport.clone()), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn response_becomes_success_with_elapsed_time() {
        let (unit, _) = unit(
            Ok(TransportResponse {
                status: 201,
                body: json!({"id": 1}),
            }),
            Duration::from_millis(250),
        );

        let outcome = unit.execute().await;

        assert_eq!(outcome.sequence_number, 9);
        assert_eq!(outcome.status, OutcomeStatus::Success { code: 201 });
        assert_eq!(outcome.body, json!({"id": 1}));
        assert_eq!(outcome.elapsed_ms, 250);
    }

    #[tokio::test]
    async fn non_2xx_response_is_still_a_success_with_code() {
        let (unit, _) = unit(
            Ok(TransportResponse {
                status: 503,
                body: json!("unavailable"),
            }),
            Duration::ZERO,
        );

        let outcome = unit.execute().await;

        assert_eq!(outcome.status, OutcomeStatus::Success { code: 503 });
        assert!(outcome.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_without_status_is_unknown_error() {
        let (unit, _) = unit(
            Err(TransportError::new(
                ErrorCategory::NetworkError,
                "error sending request: connection refused",
            )),
            Duration::from_millis(40),
        );

        let outcome = unit.execute().await;

        assert_eq!(
            outcome.status,
            OutcomeStatus::Failure {
                code: None,
                category: ErrorCategory::NetworkError
            }
        );
        assert_eq!(outcome.status.to_string(), "Unknown error");
        assert_eq!(
            outcome.body,
            json!("error sending request: connection refused")
        );
        assert_eq!(outcome.elapsed_ms, 40);
    }

    #[tokio::test]
    async fn transport_error_prefers_server_body() {
        let mut err = TransportError::new(ErrorCategory::ServerError, "body read failed");
        err.status = Some(500);
        err.body = Some(json!({"error": "boom"}));
        let (unit, _) = unit(Err(err), Duration::ZERO);

        let outcome = unit.execute().await;

        assert_eq!(outcome.status.code(), Some(500));
        assert_eq!(outcome.body, json!({"error": "boom"}));
    }

    #[tokio::test]
    async fn payload_reaches_transport_unmodified() {
        let (unit, transport) = unit(
            Ok(TransportResponse {
                status: 200,
                body: Value::Null,
            }),
            Duration::ZERO,
        );
        let expected = unit.payload().clone();

        unit.execute().await;

        assert_eq!(*transport.seen.lock().unwrap(), vec![expected]);
    }

    fn transport_for(server: &wiremock::MockServer, policy: LogPolicy) -> HttpTransport {
        HttpTransport::new(reqwest::Client::new(), server.uri(), HttpMethod::Get, None)
            .with_log_policy(policy)
    }

    #[tokio::test]
    async fn failures_only_skips_decoding_2xx_bodies() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"big": "payload"})))
            .mount(&server)
            .await;

        let quiet = transport_for(&server, LogPolicy::FailuresOnly);
        let verbose = transport_for(&server, LogPolicy::All);

        let skipped = quiet.send(&Payload::None).await.unwrap();
        let kept = verbose.send(&Payload::None).await.unwrap();

        assert_eq!(skipped, TransportResponse { status: 200, body: Value::Null });
        assert_eq!(kept.body, json!({"big": "payload"}));
    }

    #[tokio::test]
    async fn failures_only_still_decodes_error_bodies() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({"error": "upstream"})))
            .mount(&server)
            .await;

        let transport = transport_for(&server, LogPolicy::FailuresOnly);

        let response = transport.send(&Payload::None).await.unwrap();

        assert_eq!(response.status, 502);
        assert_eq!(response.body, json!({"error": "upstream"}));
    }

    #[test]
    fn decode_body_keeps_json_and_text() {
        assert_eq!(decode_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_body(b"plain text"), json!("plain text"));
        assert_eq!(decode_body(b""), json!(""));
    }

    #[test]
    fn http_method_parses_case_insensitively() {
        assert_eq!("get".parse::<HttpMethod>(), Ok(HttpMethod::Get));
        assert_eq!(" POST ".parse::<HttpMethod>(), Ok(HttpMethod::Post));
        assert!("PUT".parse::<HttpMethod>().is_err());
        assert_eq!(HttpMethod::Post.to_string(), "POST");
    }
}
