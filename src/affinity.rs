//! CPU affinity binding and CPU-list handling
//!
//! Two placement knobs live here: pinning the submitter thread itself via
//! `sched_setaffinity`, and building the `cpu_set_t` mask that is handed to
//! the ring's io-wq worker registration. Keeping both on one CPU set is what
//! makes the worker placement observable: `taskset -pc` on the io_wrk threads
//! should show the configured mask and nothing else.
//!
//! CPU lists use the familiar taskset syntax ("0,2-4,7").

use crate::Result;
use anyhow::Context;

/// Set CPU affinity for the current thread
///
/// Binds the current thread to the specified CPU cores. With the submitter
/// pinned, inline completions are guaranteed to run on the pinned core and
/// any work observed elsewhere belongs to the kernel worker pool.
///
/// Only available on Linux; on other platforms this returns an error.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cores: &[usize]) -> Result<()> {
    use libc::sched_setaffinity;
    use std::mem;

    if cores.is_empty() {
        anyhow::bail!("CPU core list cannot be empty");
    }

    let cpu_set = cpu_set(cores)?;
    let result = unsafe { sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpu_set) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        return Err(err).context(format!("Failed to set CPU affinity to cores {:?}", cores));
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_cores: &[usize]) -> Result<()> {
    anyhow::bail!("CPU affinity is only supported on Linux")
}

/// Build a `cpu_set_t` mask from a list of core IDs.
///
/// Shared by thread pinning and io-wq worker registration so both always see
/// the same mask.
#[cfg(target_os = "linux")]
pub fn cpu_set(cores: &[usize]) -> Result<libc::cpu_set_t> {
    use libc::{CPU_SET, CPU_ZERO};
    use std::mem;

    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut set);
        for &core in cores {
            if core >= 1024 {
                anyhow::bail!("CPU core ID {} is too large (max 1023)", core);
            }
            CPU_SET(core, &mut set);
        }
        Ok(set)
    }
}

/// Parse a comma-separated list of CPU cores or ranges
///
/// Supports "0,1,2", "0-3", and mixed forms like "0,2-4,7". The result is
/// sorted and deduplicated.
pub fn parse_cpu_list(spec: &str) -> Result<Vec<usize>> {
    let mut cores = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();

        if part.contains('-') {
            let range_parts: Vec<&str> = part.split('-').collect();
            if range_parts.len() != 2 {
                anyhow::bail!("Invalid CPU range format: {}", part);
            }

            let start: usize = range_parts[0]
                .parse()
                .with_context(|| format!("Invalid CPU core number: {}", range_parts[0]))?;
            let end: usize = range_parts[1]
                .parse()
                .with_context(|| format!("Invalid CPU core number: {}", range_parts[1]))?;

            if start > end {
                anyhow::bail!("Invalid CPU range: start ({}) > end ({})", start, end);
            }

            for core in start..=end {
                cores.push(core);
            }
        } else {
            let core: usize = part
                .parse()
                .with_context(|| format!("Invalid CPU core number: {}", part))?;
            cores.push(core);
        }
    }

    if cores.is_empty() {
        anyhow::bail!("CPU core list cannot be empty");
    }

    cores.sort_unstable();
    cores.dedup();

    Ok(cores)
}

/// Format a sorted core list back into range notation ("0,2-4,7").
///
/// An empty list renders as "*" (no restriction).
pub fn format_cpu_list(cores: &[usize]) -> String {
    if cores.is_empty() {
        return "*".to_string();
    }

    let mut parts = Vec::new();
    let mut start = cores[0];
    let mut prev = cores[0];

    for &core in &cores[1..] {
        if core == prev + 1 {
            prev = core;
            continue;
        }
        parts.push(if start == prev {
            format!("{}", start)
        } else {
            format!("{}-{}", start, prev)
        });
        start = core;
        prev = core;
    }
    parts.push(if start == prev {
        format!("{}", start)
    } else {
        format!("{}-{}", start, prev)
    });

    parts.join(",")
}

/// Number of logical CPU cores on the system
pub fn num_cpus() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list_single() {
        let cores = parse_cpu_list("0").unwrap();
        assert_eq!(cores, vec![0]);
    }

    #[test]
    fn test_parse_cpu_list_mixed() {
        let cores = parse_cpu_list("0,2-4,7").unwrap();
        assert_eq!(cores, vec![0, 2, 3, 4, 7]);
    }

    #[test]
    fn test_parse_cpu_list_with_spaces() {
        let cores = parse_cpu_list("0, 2-4, 7").unwrap();
        assert_eq!(cores, vec![0, 2, 3, 4, 7]);
    }

    #[test]
    fn test_parse_cpu_list_duplicates_and_order() {
        let cores = parse_cpu_list("3,1,1,2,0").unwrap();
        assert_eq!(cores, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_cpu_list_empty() {
        assert!(parse_cpu_list("").is_err());
    }

    #[test]
    fn test_parse_cpu_list_invalid_number() {
        assert!(parse_cpu_list("0,abc,2").is_err());
    }

    #[test]
    fn test_parse_cpu_list_invalid_range() {
        assert!(parse_cpu_list("5-2").is_err());
        assert!(parse_cpu_list("0-2-4").is_err());
    }

    #[test]
    fn test_format_cpu_list() {
        assert_eq!(format_cpu_list(&[]), "*");
        assert_eq!(format_cpu_list(&[3]), "3");
        assert_eq!(format_cpu_list(&[3, 4, 5, 6, 7]), "3-7");
        assert_eq!(format_cpu_list(&[0, 2, 3, 4, 7]), "0,2-4,7");
    }

    #[test]
    fn test_format_round_trips_parse() {
        let cores = parse_cpu_list("0,2-4,7").unwrap();
        assert_eq!(parse_cpu_list(&format_cpu_list(&cores)).unwrap(), cores);
    }

    #[test]
    fn test_num_cpus() {
        let cpus = num_cpus();
        assert!(cpus > 0);
        assert!(cpus <= 1024);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_set_cpu_affinity() {
        let result = set_cpu_affinity(&[0]);
        assert!(result.is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_cpu_set_rejects_huge_core() {
        assert!(cpu_set(&[4096]).is_err());
    }
}
