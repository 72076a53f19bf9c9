use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::utils::parse_headers_with_escapes;

/// Errors raised while building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid header format in CUSTOM_HEADERS: '{0}'. Expected 'Name:Value'.")]
    InvalidHeaderFormat(String),

    #[error("Invalid header name '{name}': {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: reqwest::header::InvalidHeaderName,
    },

    #[error("Invalid header value for '{name}': {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            skip_tls_verify: false,
            custom_headers: None,
        }
    }
}

/// Builds the shared reqwest client used by every request unit.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder().timeout(config.timeout);

    let headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if !headers.is_empty() {
        info!(count = headers.len(), "Configured custom default headers");
        builder = builder.default_headers(headers);
    }

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(builder.build()?)
}

/// Parses `Name:Value` pairs separated by commas (`\,` escapes a comma).
pub fn parse_custom_headers(headers_str: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut parsed = HeaderMap::new();

    let headers_str = match headers_str {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(parsed),
    };

    for pair in parse_headers_with_escapes(headers_str) {
        let pair = pair.trim();
        let Some((name, value)) = pair.split_once(':') else {
            return Err(ClientError::InvalidHeaderFormat(pair.to_string()));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidHeaderFormat(pair.to_string()));
        }

        let header_name =
            HeaderName::from_str(name).map_err(|source| ClientError::InvalidHeaderName {
                name: name.to_string(),
                source,
            })?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|source| {
            ClientError::InvalidHeaderValue {
                name: name.to_string(),
                source,
            }
        })?;

        parsed.insert(header_name, header_value);
    }

    Ok(parsed)
}
