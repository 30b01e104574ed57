//! Run counters and end-of-run reporting helpers

use std::time::Duration;

/// Counters accumulated by the pump loop.
///
/// `submitted` counts writes accepted by the kernel; `completed` counts
/// writes reconciled back. After a clean shutdown drain the two are equal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    /// Writes queued and submitted
    pub submitted: u64,
    /// Completions validated and recycled
    pub completed: u64,
    /// Bytes confirmed written
    pub bytes_written: u64,
    /// Fill/drain passes executed
    pub passes: u64,
}

/// Calculate operations per second over a duration
pub fn calculate_iops(operations: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        operations as f64 / seconds
    } else {
        0.0
    }
}

/// Calculate bytes per second over a duration
pub fn calculate_throughput(bytes: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        bytes as f64 / seconds
    } else {
        0.0
    }
}

/// Format a rate (operations per second)
pub fn format_rate(rate: f64) -> String {
    if rate < 1_000.0 {
        format!("{:.0}", rate)
    } else if rate < 1_000_000.0 {
        format!("{:.2}K", rate / 1_000.0)
    } else {
        format!("{:.2}M", rate / 1_000_000.0)
    }
}

/// Format throughput in human-readable form (B/s, KB/s, MB/s, GB/s)
pub fn format_throughput(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_sec >= GB {
        format!("{:.2} GB/s", bytes_per_sec / GB)
    } else if bytes_per_sec >= MB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.2} KB/s", bytes_per_sec / KB)
    } else {
        format!("{:.2} B/s", bytes_per_sec)
    }
}
