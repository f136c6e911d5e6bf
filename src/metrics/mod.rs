//! Request latency metrics.
//!
//! Every request handled by the reactor produces one `LatencyRecord`
//! (arrival → response ready). The aggregator keeps a bounded window of them
//! and computes `MetricsSummary` snapshots on demand.
pub mod aggregator;
pub mod record;
pub mod window;

pub use aggregator::{summarize_records, MetricsAggregator, DEFAULT_CAPACITY};
pub use record::{LatencyRecord, MetricsSummary};
pub use window::ReportWindow;
