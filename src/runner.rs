//! Run coordinator: wires configuration, transport, payloads and the result
//! log into one scheduled run.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{build_client, ClientError};
use crate::config::{Config, RunConfig};
use crate::payload::PayloadSource;
use crate::recorder::{LogPolicy, OutcomeRecorder, OutcomeSink, RecorderError};
use crate::request::{HttpTransport, RequestUnit, Transport};
use crate::scheduler::{self, RunHandle, SchedulerError};
use crate::summary::RunSummary;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] ClientError),

    #[error("Failed to open result log: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Run aborted: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Starts the scheduler with a unit factory that materializes one payload per
/// sequence number and shares a single transport.
pub fn start_run<S: OutcomeSink>(
    run: RunConfig,
    source: PayloadSource,
    transport: Arc<dyn Transport>,
    sink: S,
) -> RunHandle {
    scheduler::start(
        run,
        move |seq| RequestUnit::new(seq, source.generate(seq), transport.clone()),
        sink,
    )
}

/// Builds everything a run needs from `config` and starts it.
///
/// The result log is truncated here, before the first tick.
pub fn start(config: &Config) -> Result<RunHandle, RunError> {
    let policy = LogPolicy::from_log_all(config.log_all_responses);
    let recorder = OutcomeRecorder::create(&config.results_path, policy, config.results_format)?;
    let client = build_client(&config.client)?;

    if config.token.is_none() {
        warn!("TOKEN is not set, requests are sent without an Authorization header");
    }
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        client,
        config.target_url.clone(),
        config.method,
        config.token.clone(),
    )
    .with_log_policy(policy));

    info!(
        method = %config.method,
        url = %config.target_url,
        total_budget = config.run.total_budget(),
        "{}",
        config.banner()
    );

    Ok(start_run(config.run, config.payload.clone(), transport, recorder))
}

/// Runs a full load test and returns its summary.
pub async fn run(config: &Config) -> Result<RunSummary, RunError> {
    let handle = start(config)?;
    Ok(handle.wait().await?)
}
