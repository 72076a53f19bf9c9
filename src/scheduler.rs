//! Rate-paced dispatch and completion accounting.
//!
//! A dispatch task wakes once per tick and launches up to `target_rate`
//! request units, each on its own tokio task. Units report their outcome
//! over an mpsc channel to a single collector task. The collector is the
//! only writer of the completed counter and the only caller of the sink,
//! so the "did we just reach the budget" decision happens in one place and
//! the summary is written exactly once.
//!
//! The generator is open-loop: dispatch never waits on a response.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::metrics;
use crate::outcome::Outcome;
use crate::recorder::OutcomeSink;
use crate::request::RequestUnit;
use crate::summary::{RunStats, RunSummary};

/// Errors surfaced when awaiting a run.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Dispatch task failed: {0}")]
    Dispatcher(#[source] JoinError),

    #[error("Outcome collector task failed: {0}")]
    Collector(#[source] JoinError),
}

/// Shared counters of a run. Invariant: `completed <= sent <= total_budget`.
#[derive(Debug)]
pub struct RunState {
    total_budget: u64,
    sent: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicBool,
}

impl RunState {
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            sent: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.sent() >= self.total_budget
    }

    /// Claims the next dispatch slot, returning its sequence number.
    ///
    /// Returns `None` once the budget is spent. Sequence numbers are 1-based
    /// and gapless.
    fn claim_slot(&self) -> Option<u64> {
        let total = self.total_budget;
        self.sent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |sent| {
                (sent < total).then_some(sent + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Counts one resolved outcome and returns the new completed count.
    fn mark_completed(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Handle to a running load test.
pub struct RunHandle {
    state: Arc<RunState>,
    stop: Arc<Notify>,
    dispatcher: JoinHandle<()>,
    collector: JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Stops dispatching. Requests already in flight still complete and are
    /// recorded; the summary reports the actual totals.
    pub fn cancel(&self) {
        self.stop.notify_one();
    }

    /// A detached cancel switch, usable after the handle moved into `wait`.
    pub fn canceller(&self) -> RunCanceller {
        RunCanceller {
            stop: self.stop.clone(),
        }
    }

    /// Waits until the summary has been written.
    pub async fn wait(self) -> Result<RunSummary, SchedulerError> {
        let summary = self.collector.await.map_err(SchedulerError::Collector)?;
        self.dispatcher.await.map_err(SchedulerError::Dispatcher)?;
        Ok(summary)
    }
}

#[derive(Clone)]
pub struct RunCanceller {
    stop: Arc<Notify>,
}

impl RunCanceller {
    pub fn cancel(&self) {
        self.stop.notify_one();
    }
}

/// Starts a run. Must be called from within a tokio runtime.
///
/// `make_unit` is invoked once per dispatch slot with the slot's sequence
/// number. `sink` receives every outcome and, after the last one, the
/// summary.
pub fn start<F, S>(config: RunConfig, make_unit: F, sink: S) -> RunHandle
where
    F: FnMut(u64) -> RequestUnit + Send + 'static,
    S: OutcomeSink,
{
    let state = Arc::new(RunState::new(config.total_budget()));
    let stop = Arc::new(Notify::new());
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    info!(
        target_rate = config.target_rate(),
        duration_secs = config.duration_secs(),
        total_budget = config.total_budget(),
        tick_ms = config.tick_interval().as_millis() as u64,
        "Dispatch scheduler starting"
    );

    let collector = tokio::spawn(collect_outcomes(
        state.clone(),
        sink,
        outcome_rx,
        Instant::now(),
    ));
    let dispatcher = tokio::spawn(dispatch_loop(
        config,
        state.clone(),
        make_unit,
        outcome_tx,
        stop.clone(),
    ));

    RunHandle {
        state,
        stop,
        dispatcher,
        collector,
    }
}

async fn dispatch_loop<F>(
    config: RunConfig,
    state: Arc<RunState>,
    mut make_unit: F,
    outcomes: mpsc::UnboundedSender<Outcome>,
    stop: Arc<Notify>,
) where
    F: FnMut(u64) -> RequestUnit + Send + 'static,
{
    let period = config.tick_interval();
    // First tick fires one period after start, like a plain repeating timer.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.notified() => {
                state.cancelled.store(true, Ordering::SeqCst);
                info!(sent = state.sent(), "Dispatch cancelled");
                break;
            }
        }
        tick += 1;

        if state.is_exhausted() {
            debug!(tick, "Tick after budget exhausted, ignoring");
            break;
        }

        let mut dispatched = 0u32;
        for _ in 0..config.target_rate() {
            let Some(seq) = state.claim_slot() else {
                break;
            };
            spawn_unit(make_unit(seq), outcomes.clone());
            metrics::observe_dispatch();
            dispatched += 1;
        }

        debug!(tick, dispatched, sent = state.sent(), "Tick dispatched");

        if state.is_exhausted() {
            info!(tick, sent = state.sent(), "Request budget exhausted, stopping ticker");
            break;
        }
    }
}

/// Runs one unit on its own task. A panicking unit still reports an outcome.
fn spawn_unit(unit: RequestUnit, outcomes: mpsc::UnboundedSender<Outcome>) {
    let seq = unit.sequence_number();
    let started = Instant::now();

    tokio::spawn(async move {
        let outcome = match tokio::spawn(unit.execute()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(seq, error = %e, "Request task aborted");
                Outcome::aborted(
                    seq,
                    format!("request task failed: {}", e),
                    started.elapsed().as_millis() as u64,
                )
            }
        };
        if outcomes.send(outcome).is_err() {
            warn!(seq, "Outcome collector already finished, dropping outcome");
        }
    });
}

/// Single owner of the completed counter, the sink and the stats.
///
/// Finishes when completed reaches the budget, or when every sender is gone
/// (dispatch stopped early and all in-flight units have reported).
async fn collect_outcomes<S: OutcomeSink>(
    state: Arc<RunState>,
    mut sink: S,
    mut outcomes: mpsc::UnboundedReceiver<Outcome>,
    started: Instant,
) -> RunSummary {
    let mut stats = RunStats::new();

    while let Some(outcome) = outcomes.recv().await {
        metrics::observe_outcome(&outcome);
        stats.observe(&outcome);
        if let Err(e) = sink.record(&outcome) {
            stats.log_write_failed();
            error!(seq = outcome.sequence_number, error = %e, "Failed to record outcome");
        }

        let completed = state.mark_completed();
        if completed == state.total_budget() {
            break;
        }
    }

    let summary = stats.into_summary(
        state.total_budget(),
        state.sent(),
        state.completed(),
        started.elapsed(),
        state.is_cancelled(),
    );

    if let Err(e) = sink.finalize(&summary) {
        error!(error = %e, "Failed to write run summary");
    }
    info!(
        sent = summary.sent,
        completed = summary.completed,
        failures = summary.failures,
        "{}",
        summary.summary_line()
    );

    summary
}
