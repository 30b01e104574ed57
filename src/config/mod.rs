//! Run configuration
//!
//! The CLI layer parses strings; this module holds the validated, typed
//! configuration the rest of the tool runs on. `Config::from_cli` performs
//! all conversions (size suffixes, CPU lists, durations) and `validate`
//! enforces the structural constraints the ring and pool rely on.

pub mod cli;
pub mod cli_convert;

pub use cli::Cli;

use crate::affinity;
use crate::Result;
use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

/// Ring creation and registration parameters
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Submission queue depth; also the buffer pool capacity
    pub queue_depth: usize,
    /// Use a kernel SQPOLL thread instead of COOP_TASKRUN
    pub sqpoll: bool,
    /// SQPOLL thread idle time in milliseconds
    pub sqpoll_idle_ms: u32,
    /// Dedicated CPU for the SQPOLL thread
    pub sqpoll_cpu: Option<u32>,
    /// Flag writes IOSQE_ASYNC to force io-wq execution
    pub sqe_async: bool,
    /// CPU set registered for io-wq workers; empty means unrestricted
    pub worker_cpus: Vec<usize>,
    /// Cap per io-wq worker type, if set
    pub max_workers: Option<u32>,
}

/// Full validated run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub ring: RingConfig,
    /// Bytes per write; every buffer slot is this size
    pub block_size: usize,
    /// Target file count, written round-robin
    pub num_files: usize,
    /// Directory for target files
    pub dir: PathBuf,
    /// CPU to pin the submitter thread to
    pub main_cpu: Option<usize>,
    /// Optional run length; None means run until interrupted
    pub duration: Option<Duration>,
}

impl Config {
    /// Convert parsed CLI arguments into a typed configuration.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let block_size = cli_convert::parse_size(&cli.block_size)
            .context("invalid --block-size")? as usize;

        let worker_cpus = match &cli.worker_cpus {
            Some(spec) => affinity::parse_cpu_list(spec).context("invalid --worker-cpus")?,
            None => Vec::new(),
        };

        let duration = match &cli.duration {
            Some(spec) => Some(Duration::from_secs(
                cli_convert::parse_duration(spec).context("invalid --duration")?,
            )),
            None => None,
        };

        let config = Config {
            ring: RingConfig {
                queue_depth: cli.queue_depth,
                // --sqpoll-cpu implies SQPOLL.
                sqpoll: cli.sqpoll || cli.sqpoll_cpu.is_some(),
                sqpoll_idle_ms: cli.sqpoll_idle,
                sqpoll_cpu: cli.sqpoll_cpu,
                sqe_async: cli.sqe_async,
                worker_cpus,
                max_workers: cli.max_workers,
            },
            block_size,
            num_files: cli.num_files,
            dir: cli.dir.clone(),
            main_cpu: cli.main_cpu,
            duration,
        };
        config.validate()?;
        Ok(config)
    }

    /// Enforce the structural constraints the pool and ring rely on.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.ring.queue_depth > 0, "queue depth must be at least 1");
        anyhow::ensure!(
            self.ring.queue_depth <= 32768,
            "queue depth {} exceeds the 32768 ring limit",
            self.ring.queue_depth
        );
        anyhow::ensure!(
            self.block_size.is_power_of_two(),
            "block size must be a power of 2, got {}",
            self.block_size
        );
        anyhow::ensure!(self.num_files > 0, "at least one target file is required");
        if let Some(max) = self.ring.max_workers {
            anyhow::ensure!(max > 0, "--max-workers must be at least 1");
        }
        if let Some(d) = self.duration {
            anyhow::ensure!(!d.is_zero(), "--duration must be non-zero");
        }

        // CPU IDs beyond the machine are not fatal to sched_setaffinity on
        // some kernels, so catch them here where the message can be clear.
        let online = affinity::num_cpus();
        if let Some(cpu) = self.main_cpu {
            anyhow::ensure!(
                cpu < online,
                "--main-cpu {} is beyond the last online CPU ({})",
                cpu,
                online - 1
            );
        }
        for &cpu in &self.ring.worker_cpus {
            anyhow::ensure!(
                cpu < online,
                "--worker-cpus includes {} which is beyond the last online CPU ({})",
                cpu,
                online - 1
            );
        }
        if let Some(cpu) = self.ring.sqpoll_cpu {
            anyhow::ensure!(
                (cpu as usize) < online,
                "--sqpoll-cpu {} is beyond the last online CPU ({})",
                cpu,
                online - 1
            );
        }

        Ok(())
    }
}
