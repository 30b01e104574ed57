//! wqpulse CLI entry point

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use wqpulse::affinity;
use wqpulse::config::{Cli, Config};
use wqpulse::stats::{self, PumpStats};

/// Set by the SIGINT handler; the pump polls it once per pass.
static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn main() -> Result<()> {
    println!("wqpulse v{}", env!("CARGO_PKG_VERSION"));
    println!("io_uring worker-pool affinity stress tool");
    println!();

    let cli = Cli::parse_args();
    let config = Config::from_cli(&cli)?;

    print_configuration(&config);
    println!();

    // Safety: the handler only stores into an atomic.
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }

    if let Some(duration) = config.duration {
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            STOP.store(true, Ordering::Relaxed);
        });
        println!("Running for {:?} (Ctrl-C to stop early)...", duration);
    } else {
        println!("Running until interrupted (Ctrl-C to stop)...");
    }
    println!();

    run(&config)
}

fn print_configuration(config: &Config) {
    println!("Configuration:");
    println!("  Directory:     {}", config.dir.display());
    println!("  Target files:  {}", config.num_files);
    println!("  Queue depth:   {}", config.ring.queue_depth);
    println!("  Block size:    {} bytes", config.block_size);
    println!("  SQE async:     {}", config.ring.sqe_async);
    if config.ring.sqpoll {
        match config.ring.sqpoll_cpu {
            Some(cpu) => println!(
                "  SQPOLL:        on (cpu {}, idle {} ms)",
                cpu, config.ring.sqpoll_idle_ms
            ),
            None => println!("  SQPOLL:        on (idle {} ms)", config.ring.sqpoll_idle_ms),
        }
    } else {
        println!("  SQPOLL:        off (COOP_TASKRUN)");
    }
    match config.main_cpu {
        Some(cpu) => println!("  Main CPU:      {}", cpu),
        None => println!("  Main CPU:      unpinned"),
    }
    println!(
        "  Worker CPUs:   {}",
        affinity::format_cpu_list(&config.ring.worker_cpus)
    );
    match config.ring.max_workers {
        Some(max) => println!("  Max workers:   {}", max),
        None => println!("  Max workers:   kernel default"),
    }
}

fn print_results(stats: &PumpStats, elapsed: std::time::Duration) {
    let iops = stats::calculate_iops(stats.completed, elapsed);
    let throughput = stats::calculate_throughput(stats.bytes_written, elapsed);

    println!();
    println!(
        "DONE ({} blocks submitted, {} completed in {:.2}s)",
        stats.submitted,
        stats.completed,
        elapsed.as_secs_f64()
    );
    println!(
        "  {} writes/s, {}",
        stats::format_rate(iops),
        stats::format_throughput(throughput)
    );
}

#[cfg(feature = "io_uring")]
fn run(config: &Config) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    use std::time::Instant;
    use wqpulse::engine::uring::UringEngine;
    use wqpulse::pool::SlotPool;
    use wqpulse::pump::Pump;
    use wqpulse::target;

    if let Some(cpu) = config.main_cpu {
        affinity::set_cpu_affinity(&[cpu])?;
    }

    // Handles must outlive the ring: their descriptors go into the
    // fixed-file table.
    let files = target::open_targets(&config.dir, config.num_files)?;
    let fds: Vec<_> = files.iter().map(|f| f.as_raw_fd()).collect();

    let engine = UringEngine::new(&config.ring, &fds)?;

    let mut pool = SlotPool::new(config.ring.queue_depth as u32, config.block_size);
    pool.prefill_random();

    let mut pump = Pump::new(pool, Box::new(engine), config.num_files as u32)?;

    let started = Instant::now();
    let outcome = pump.run(&STOP);
    let elapsed = started.elapsed();

    // Totals are reported on the fatal path too; the error then propagates
    // for a nonzero exit.
    print_results(pump.stats(), elapsed);
    outcome
}

#[cfg(not(feature = "io_uring"))]
fn run(_config: &Config) -> Result<()> {
    anyhow::bail!("built without the io_uring feature; no ring engine available")
}
