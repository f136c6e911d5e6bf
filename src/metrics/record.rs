use crate::clock::monotonic_nanos;
use serde::Serialize;
use std::fmt;

/// Start/end instants of one request, in monotonic nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRecord {
    start_time: i64,
    end_time: i64,
}

impl LatencyRecord {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// A record that started at `start_time` and ends now.
    pub fn since(start_time: i64) -> Self {
        Self::new(start_time, monotonic_nanos())
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    /// Elapsed nanoseconds, never negative.
    pub fn latency_nanos(&self) -> i64 {
        (self.end_time - self.start_time).max(0)
    }

    pub fn latency_millis(&self) -> f64 {
        self.latency_nanos() as f64 / 1_000_000.0
    }
}

/// Snapshot of latency and throughput over a window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSummary {
    pub total_messages: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub throughput_per_sec: f64,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetricsSummary{{total={}, avgLatency={:.2}ms, p95={:.2}ms, p99={:.2}ms, throughput={:.2} msg/s}}",
            self.total_messages,
            self.avg_latency_ms,
            self.p95_latency_ms,
            self.p99_latency_ms,
            self.throughput_per_sec
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_record() {
        let r = LatencyRecord::new(1_000, 2_501_000);
        assert_eq!(r.latency_nanos(), 2_500_000);
        assert_eq!(r.latency_millis(), 2.5);
    }

    #[test]
    fn test_reversed_record_clamps_to_zero() {
        assert_eq!(LatencyRecord::new(10, 5).latency_nanos(), 0);
    }

    #[test]
    fn test_summary_display() {
        let s = MetricsSummary {
            total_messages: 4,
            avg_latency_ms: 25.0,
            p95_latency_ms: 40.0,
            p99_latency_ms: 40.0,
            throughput_per_sec: 4.0,
        };
        assert_eq!(
            s.to_string(),
            "MetricsSummary{total=4, avgLatency=25.00ms, p95=40.00ms, p99=40.00ms, throughput=4.00 msg/s}"
        );
    }
}
