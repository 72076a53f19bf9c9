use std::env;
use std::path::PathBuf;
use thiserror::Error;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::payload::{PayloadSource, PayloadTemplate, QueryParamSets, TemplateError};
use crate::recorder::LogFormat;
use crate::request::HttpMethod;
use crate::utils::{parse_bool, parse_duration_string};

/// Configuration errors. All of them abort the run before anything is sent.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TARGET_URL (or BASE_URL) environment variable must be set")]
    MissingTargetUrl,

    #[error("TARGET_URL must start with http:// or https://, got '{0}'")]
    InvalidTargetUrl(String),

    #[error("Invalid {var} value '{value}': {message}")]
    InvalidValue {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("Invalid payload in {var}: {source}")]
    Payload {
        var: &'static str,
        #[source]
        source: TemplateError,
    },
}

/// Rate, duration and the request budget derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    target_rate: u32,
    duration_secs: u32,
    total_budget: u64,
    tick_interval: Duration,
}

impl RunConfig {
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

    pub fn new(target_rate: u32, duration_secs: u32) -> Result<Self, ConfigError> {
        if target_rate == 0 {
            return Err(ConfigError::NotPositive("REQUESTS_PER_SECOND"));
        }
        if duration_secs == 0 {
            return Err(ConfigError::NotPositive("TEST_DURATION"));
        }

        Ok(Self {
            target_rate,
            duration_secs,
            total_budget: u64::from(target_rate) * u64::from(duration_secs),
            tick_interval: Self::DEFAULT_TICK_INTERVAL,
        })
    }

    /// Overrides the tick length. Mostly useful to run the engine quickly.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval.max(Duration::from_millis(1));
        self
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub token: Option<String>,
    pub method: HttpMethod,
    pub run: RunConfig,
    pub log_all_responses: bool,
    pub results_path: PathBuf,
    pub results_format: LogFormat,
    pub payload: PayloadSource,
    pub client: ClientConfig,
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration from any name → value lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let target_url = var("TARGET_URL")
            .or_else(|| var("BASE_URL"))
            .ok_or(ConfigError::MissingTargetUrl)?;
        if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
            return Err(ConfigError::InvalidTargetUrl(target_url));
        }

        let token = var("TOKEN");

        let method = match var("REQUEST_TYPE") {
            Some(v) => v.parse().map_err(|message| ConfigError::InvalidValue {
                var: "REQUEST_TYPE",
                value: v.clone(),
                message,
            })?,
            None => HttpMethod::Get,
        };

        let target_rate = parse_number::<u32>("REQUESTS_PER_SECOND", var("REQUESTS_PER_SECOND"), 50)?;

        let duration_str = var("TEST_DURATION").unwrap_or_else(|| "20s".to_string());
        let duration = parse_duration_var("TEST_DURATION", &duration_str)?;
        let duration_secs =
            u32::try_from(duration.as_secs()).map_err(|e| ConfigError::InvalidValue {
                var: "TEST_DURATION",
                value: duration_str.clone(),
                message: e.to_string(),
            })?;

        let run = RunConfig::new(target_rate, duration_secs)?;

        let log_all_responses = parse_flag("LOG_ALL_RESPONSES", var("LOG_ALL_RESPONSES"), false)?;

        let results_dir = var("RESULTS_DIR").unwrap_or_else(|| "results".to_string());
        let results_file = var("RESULTS_FILE").unwrap_or_else(|| {
            match method {
                HttpMethod::Get => "results.txt",
                HttpMethod::Post => "post_results.txt",
            }
            .to_string()
        });
        let results_path = PathBuf::from(results_dir).join(results_file);

        let results_format = match var("RESULTS_FORMAT") {
            Some(v) => v.parse().map_err(|message| ConfigError::InvalidValue {
                var: "RESULTS_FORMAT",
                value: v.clone(),
                message,
            })?,
            None => LogFormat::Text,
        };

        let payload = match method {
            HttpMethod::Get => PayloadSource::Query(Self::load_query_params(&var)?),
            HttpMethod::Post => PayloadSource::Body(match var("JSON_TEMPLATE") {
                Some(json) => PayloadTemplate::from_json_str(&json).map_err(|source| {
                    ConfigError::Payload {
                        var: "JSON_TEMPLATE",
                        source,
                    }
                })?,
                None => PayloadTemplate::default(),
            }),
        };

        let timeout_str = var("REQUEST_TIMEOUT").unwrap_or_else(|| "30s".to_string());
        let client = ClientConfig {
            timeout: parse_duration_var("REQUEST_TIMEOUT", &timeout_str)?,
            skip_tls_verify: parse_flag("SKIP_TLS_VERIFY", var("SKIP_TLS_VERIFY"), false)?,
            custom_headers: var("CUSTOM_HEADERS"),
        };

        let metrics_port = var("METRICS_PORT")
            .map(|v| parse_number::<u16>("METRICS_PORT", Some(v), 0))
            .transpose()?;

        Ok(Config {
            target_url,
            token,
            method,
            run,
            log_all_responses,
            results_path,
            results_format,
            payload,
            client,
            metrics_port,
        })
    }

    fn load_query_params<V>(var: &V) -> Result<QueryParamSets, ConfigError>
    where
        V: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("QUERY_PARAMS_FILE") {
            return QueryParamSets::from_csv_file(path).map_err(|source| ConfigError::Payload {
                var: "QUERY_PARAMS_FILE",
                source,
            });
        }
        match var("QUERY_PARAMS") {
            Some(json) => {
                QueryParamSets::from_json_str(&json).map_err(|source| ConfigError::Payload {
                    var: "QUERY_PARAMS",
                    source,
                })
            }
            None => Ok(QueryParamSets::sample()),
        }
    }

    /// The console line printed when a run starts.
    pub fn banner(&self) -> String {
        format!(
            "Starting {} test: {} RPS for {}s...",
            self.method,
            self.run.target_rate(),
            self.run.duration_secs()
        )
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("{}", self.banner());
        println!("  Target URL: {}", self.target_url);
        println!("  Total requests: {}", self.run.total_budget());
        println!(
            "  Auth token: {}",
            if self.token.is_some() { "set" } else { "not set" }
        );
        println!(
            "  Logging: {}",
            if self.log_all_responses {
                "all responses"
            } else {
                "failures only"
            }
        );
        println!(
            "  Results file: {} ({})",
            self.results_path.display(),
            self.results_format
        );
        println!("  Request timeout: {:?}", self.client.timeout);
        if let Some(port) = self.metrics_port {
            println!("  Metrics: http://0.0.0.0:{}/metrics", port);
        }
    }
}

fn parse_number<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value: v.clone(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_flag(var: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value {
        Some(v) => parse_bool(&v).map_err(|message| ConfigError::InvalidValue {
            var,
            value: v.clone(),
            message,
        }),
        None => Ok(default),
    }
}

fn parse_duration_var(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration_string(value).map_err(|message| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        message,
    })
}
