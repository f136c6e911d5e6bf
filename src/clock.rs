use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the first call in this process.
///
/// Used for message timestamps and latency samples. Values are only
/// comparable within one process, never across restarts.
pub fn monotonic_nanos() -> i64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    // i64 nanoseconds covers ~292 years of uptime.
    epoch.elapsed().as_nanos() as i64
}
