use crate::metrics::{MetricsAggregator, MetricsSummary};
use std::time::Instant;

/// Time span covered by a periodic metrics report.
///
/// Each `roll` divides by the time actually elapsed since the previous
/// roll, so a report cut short (shutdown) still gets a correct throughput.
#[derive(Debug, Clone, Copy)]
pub struct ReportWindow {
    start: Instant,
}

impl ReportWindow {
    pub fn open() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Drain everything recorded since the window opened and open the next one.
    pub fn roll(&mut self, metrics: &MetricsAggregator) -> MetricsSummary {
        let now = Instant::now();
        let window_ms = now.duration_since(self.start).as_millis() as u64;
        self.start = now;
        metrics.drain_summary(window_ms)
    }
}

impl Default for ReportWindow {
    fn default() -> Self {
        Self::open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LatencyRecord;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_roll_uses_elapsed_time() {
        let metrics = MetricsAggregator::new();
        let mut window = ReportWindow::open();

        for i in 0..10 {
            metrics.record(LatencyRecord::new(i, i + 1_000_000));
        }
        thread::sleep(Duration::from_millis(100));

        let summary = window.roll(&metrics);
        assert_eq!(summary.total_messages, 10);
        // 10 messages over at least 100ms.
        assert!(summary.throughput_per_sec > 0.0);
        assert!(summary.throughput_per_sec <= 100.0);
        assert!(metrics.is_empty());

        // The next window starts at the roll.
        assert!(window.elapsed_ms() < 100);
        assert_eq!(window.roll(&metrics).total_messages, 0);
    }
}
