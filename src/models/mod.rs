// Domain models: raw samples, wire messages, controller-side node state

mod node;
mod report;
mod sample;

pub use node::{MetricSnapshot, NodeStatus};
pub use report::{Ack, PingResult, ProbeKind, Report, Target};
pub use sample::{CpuStats, DiskStats, KvmStats, MemStats, NetStats, RawSample};

/// Wall-clock milliseconds since the Unix epoch. Returns 0 if the clock is before the epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "now_ms", "system time error");
            0
        })
}
