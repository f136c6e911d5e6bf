use super::record::{LatencyRecord, MetricsSummary};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Default number of samples kept before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Collects per-request latency records from every reactor worker.
///
/// Design:
/// - One mutex-guarded `VecDeque`; `record` holds the lock for a single push
///   so the start/end pair of one request always lands together
/// - Bounded: once `capacity` samples are held the oldest is dropped, which
///   caps memory under sustained load
/// - Summaries sort a snapshot outside the lock
pub struct MetricsAggregator {
    records: Mutex<VecDeque<LatencyRecord>>,
    capacity: usize,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Record one request.
    pub fn record(&self, record: LatencyRecord) {
        // A panic elsewhere cannot leave a half-written record behind, so a
        // poisoned lock is still safe to use.
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Summarize everything currently held over a caller-supplied window.
    pub fn summarize(&self, duration_ms: u64) -> MetricsSummary {
        let snapshot: Vec<LatencyRecord> = {
            let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            records.iter().copied().collect()
        };
        summarize_records(&snapshot, duration_ms)
    }

    /// Summarize and clear in one step. Used for periodic reports.
    pub fn drain_summary(&self, duration_ms: u64) -> MetricsSummary {
        let drained: Vec<LatencyRecord> = {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            records.drain(..).collect()
        };
        summarize_records(&drained, duration_ms)
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a summary from a set of records.
///
/// - avg: arithmetic mean of latencies, ns → ms
/// - p95/p99: nearest rank, `index = ceil(p/100 * n) - 1`, clamped at 0
/// - throughput: `n / (duration_ms / 1000)`, 0 for a zero-length window
pub fn summarize_records(records: &[LatencyRecord], duration_ms: u64) -> MetricsSummary {
    if records.is_empty() {
        return MetricsSummary::default();
    }

    let mut latencies: Vec<i64> = records.iter().map(LatencyRecord::latency_nanos).collect();
    latencies.sort_unstable();

    let count = latencies.len();
    let sum: i128 = latencies.iter().map(|&l| l as i128).sum();
    let avg_nanos = sum as f64 / count as f64;

    let throughput_per_sec = if duration_ms == 0 {
        0.0
    } else {
        count as f64 / (duration_ms as f64 / 1000.0)
    };

    MetricsSummary {
        total_messages: count as u64,
        avg_latency_ms: avg_nanos / NANOS_PER_MILLI,
        p95_latency_ms: nearest_rank(&latencies, 95) as f64 / NANOS_PER_MILLI,
        p99_latency_ms: nearest_rank(&latencies, 99) as f64 / NANOS_PER_MILLI,
        throughput_per_sec,
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn nearest_rank(sorted: &[i64], percentile: u32) -> i64 {
    let rank = (percentile as f64 / 100.0 * sorted.len() as f64).ceil() as i64 - 1;
    let idx = (rank.max(0) as usize).min(sorted.len() - 1);
    sorted[idx]
}
