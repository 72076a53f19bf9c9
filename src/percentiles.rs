//! Latency percentiles using HDR Histogram.
//!
//! The outcome collector is the only writer, so the histogram is owned
//! directly rather than shared behind a lock.

use hdrhistogram::{CreationError, Histogram};
use tracing::warn;

/// Highest latency tracked, in milliseconds (one hour).
const MAX_TRACKED_MS: u64 = 60 * 60 * 1000;

/// Percentile statistics for a set of latency measurements, in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

impl LatencyStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, min={}ms, max={}ms, mean={:.2}ms, p50={}ms, p90={}ms, p95={}ms, p99={}ms",
            self.count,
            self.min,
            self.max,
            self.mean,
            self.p50,
            self.p90,
            self.p95,
            self.p99,
        )
    }
}

/// Records request latencies in milliseconds.
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    /// Tracks 0ms to one hour with 3 significant digits.
    pub fn new() -> Result<Self, CreationError> {
        Ok(Self {
            histogram: Histogram::new_with_bounds(1, MAX_TRACKED_MS, 3)?,
        })
    }

    pub fn record_ms(&mut self, latency_ms: u64) {
        // Sub-millisecond responses are stored as 0 and the low bound is 1.
        let clamped = latency_ms.min(MAX_TRACKED_MS);
        if let Err(e) = self.histogram.record(clamped) {
            warn!(latency_ms, error = %e, "Failed to record latency in histogram");
        }
    }

    /// Returns None if no samples have been recorded.
    pub fn stats(&self) -> Option<LatencyStats> {
        let hist = &self.histogram;
        if hist.is_empty() {
            return None;
        }

        Some(LatencyStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
        })
    }
}
