//! CLI argument parsing using clap

use clap::Parser;
use std::path::PathBuf;

/// wqpulse - io_uring worker-pool affinity stress tool
///
/// Runs a continuous stream of fixed-size asynchronous writes through one
/// io_uring instance while confining the kernel's io-wq worker threads to a
/// chosen CPU set, so worker placement can be observed under sustained load.
#[derive(Parser, Debug)]
#[command(name = "wqpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory in which target files are created
    #[arg(value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    // === Ring Options ===
    /// Submission queue depth
    #[arg(short = 'q', long, default_value = "256")]
    pub queue_depth: usize,

    /// Block size per write (e.g., 4k, 64k, 1M)
    #[arg(short = 'b', long, default_value = "4k")]
    pub block_size: String,

    /// Number of target files, written round-robin
    #[arg(short = 'n', long, default_value = "2")]
    pub num_files: usize,

    /// Flag every write IOSQE_ASYNC to force it onto the io-wq worker pool
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub sqe_async: bool,

    // === SQPOLL Options ===
    /// Use a kernel SQPOLL thread instead of COOP_TASKRUN
    #[arg(long)]
    pub sqpoll: bool,

    /// Pin the SQPOLL thread to this CPU (implies --sqpoll)
    #[arg(long)]
    pub sqpoll_cpu: Option<u32>,

    /// SQPOLL thread idle time in milliseconds
    #[arg(long, default_value = "2000")]
    pub sqpoll_idle: u32,

    // === Placement Options ===
    /// Pin the submitter thread to this CPU
    #[arg(long)]
    pub main_cpu: Option<usize>,

    /// CPU list for io-wq worker threads (e.g., "3", "0,2-4,7")
    #[arg(long)]
    pub worker_cpus: Option<String>,

    /// Cap on io-wq workers per type (bounded and unbounded)
    #[arg(long)]
    pub max_workers: Option<u32>,

    // === Run Options ===
    /// Stop after this long instead of running until interrupted (e.g., 30s, 5m)
    #[arg(short = 'd', long)]
    pub duration: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::parse_from(["wqpulse"]);
        assert_eq!(cli.queue_depth, 256);
        assert_eq!(cli.block_size, "4k");
        assert_eq!(cli.num_files, 2);
        assert!(cli.sqe_async);
        assert!(!cli.sqpoll);
        assert_eq!(cli.sqpoll_idle, 2000);
        assert!(cli.worker_cpus.is_none());
        assert!(cli.duration.is_none());
    }

    #[test]
    fn sqe_async_can_be_disabled() {
        let cli = Cli::parse_from(["wqpulse", "--sqe-async", "false"]);
        assert!(!cli.sqe_async);
    }

    #[test]
    fn placement_flags_parse() {
        let cli = Cli::parse_from([
            "wqpulse",
            "--main-cpu",
            "1",
            "--worker-cpus",
            "2-4",
            "--max-workers",
            "8",
            "/tmp",
        ]);
        assert_eq!(cli.main_cpu, Some(1));
        assert_eq!(cli.worker_cpus.as_deref(), Some("2-4"));
        assert_eq!(cli.max_workers, Some(8));
        assert_eq!(cli.dir, PathBuf::from("/tmp"));
    }
}
