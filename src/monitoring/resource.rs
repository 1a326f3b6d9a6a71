//! Process Resource Sampling
//!
//! Point-in-time snapshots of the current process, taken at lifecycle
//! boundaries (after init, before stop) and included in the final report.

use std::fmt;

use serde::Serialize;
use sysinfo::{get_current_pid, Process, ProcessRefreshKind, System};

use crate::error::SamplerError;

const MB: u64 = 1024 * 1024;

/// Resource usage of the process at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    /// Run time the snapshot refers to
    pub elapsed_ms: u64,
    /// OS threads in the process (0 when the platform does not expose them)
    pub threads: usize,
    /// Resident set size in bytes
    pub resident_bytes: u64,
    /// Virtual memory in bytes
    pub virtual_bytes: u64,
    /// User + system CPU time minus the excluded baseline
    pub cpu_seconds: f64,
}

impl ResourceSnapshot {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms as f64 / 1000.0
    }
}

impl fmt::Display for ResourceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}s; threads: {}; resident: {}MB; virtual: {}MB; processor time: {:.1}s",
            self.elapsed_secs(),
            self.threads,
            self.resident_bytes / MB,
            self.virtual_bytes / MB,
            self.cpu_seconds
        )
    }
}

/// Takes process resource snapshots. Stateless.
pub struct ResourceSampler;

impl ResourceSampler {
    /// Captures the current process state.
    ///
    /// `excluded_cpu_secs` is subtracted from the CPU time, which isolates
    /// the work phase from the init phase.
    pub fn sample(elapsed_ms: u64, excluded_cpu_secs: f64) -> Result<ResourceSnapshot, SamplerError> {
        let pid = get_current_pid().map_err(|e| SamplerError::Pid(e.to_string()))?;

        let mut system = System::new();
        let refresh_kind = ProcessRefreshKind::new().with_memory();
        system.refresh_process_specifics(pid, refresh_kind);

        let process = system
            .process(pid)
            .ok_or(SamplerError::ProcessNotFound(pid.as_u32()))?;

        Ok(ResourceSnapshot {
            elapsed_ms,
            threads: thread_count(process),
            resident_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            cpu_seconds: (process_cpu_seconds() - excluded_cpu_secs).max(0.0),
        })
    }
}

/// Number of OS threads in the current process.
///
/// A single-process refresh does not load the task list, so on Linux the
/// threads are counted from procfs directly.
#[cfg(target_os = "linux")]
fn thread_count(process: &Process) -> usize {
    match std::fs::read_dir("/proc/self/task") {
        Ok(entries) => entries.count(),
        Err(_) => process.tasks().map_or(0, |tasks| tasks.len()),
    }
}

#[cfg(not(target_os = "linux"))]
fn thread_count(process: &Process) -> usize {
    process.tasks().map_or(0, |tasks| tasks.len())
}

/// Total user + system CPU time consumed by this process, in seconds.
#[cfg(unix)]
pub fn process_cpu_seconds() -> f64 {
    // SAFETY: a zeroed rusage is a valid out-parameter and the return code
    // is checked before reading it.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return 0.0;
        }
        timeval_secs(usage.ru_utime) + timeval_secs(usage.ru_stime)
    }
}

/// Non-unix fallback: CPU time is not available.
#[cfg(not(unix))]
pub fn process_cpu_seconds() -> f64 {
    0.0
}

#[cfg(unix)]
fn timeval_secs(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_current_process() {
        let snapshot = ResourceSampler::sample(1500, 0.0).unwrap();
        assert_eq!(snapshot.elapsed_ms, 1500);
        assert!(snapshot.resident_bytes > 0);
        assert!(snapshot.cpu_seconds >= 0.0);
        #[cfg(target_os = "linux")]
        assert!(snapshot.threads >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sample_counts_live_threads() {
        use std::sync::{Arc, Barrier};

        let release = Arc::new(Barrier::new(5));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let release = Arc::clone(&release);
                std::thread::spawn(move || {
                    release.wait();
                })
            })
            .collect();

        let snapshot = ResourceSampler::sample(0, 0.0).unwrap();
        release.wait();
        for handle in handles {
            handle.join().unwrap();
        }

        // Four parked helpers plus the test thread itself.
        assert!(snapshot.threads >= 5, "threads reported = {}", snapshot.threads);
    }

    #[test]
    fn test_excluded_cpu_never_negative() {
        let snapshot = ResourceSampler::sample(0, 1_000_000.0).unwrap();
        assert_eq!(snapshot.cpu_seconds, 0.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_cpu_time_grows() {
        let before = process_cpu_seconds();
        let mut acc = 0u64;
        for i in 0..20_000_000u64 {
            acc = acc.wrapping_add(i * i);
        }
        std::hint::black_box(acc);
        assert!(process_cpu_seconds() >= before);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = ResourceSnapshot {
            elapsed_ms: 2500,
            threads: 12,
            resident_bytes: 64 * MB,
            virtual_bytes: 512 * MB,
            cpu_seconds: 1.25,
        };
        let text = snapshot.to_string();
        assert!(text.starts_with("2.5s"));
        assert!(text.contains("threads: 12"));
        assert!(text.contains("resident: 64MB"));
        assert!(text.contains("virtual: 512MB"));
    }
}
