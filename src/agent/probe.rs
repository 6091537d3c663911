//! Raw readings of process and host statistics.
//!
//! [`HostProbe`] takes process and memory figures from `sysinfo`. Cumulative
//! per-core busy time is not exposed by `sysinfo` (it only reports usage since
//! its own last refresh), so that one reading still comes from `/proc/stat`
//! and fails on other platforms.

use crate::core::{MetricsError, Result};
use parking_lot::Mutex;
use std::fs;
use std::io;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// /proc/stat counts in USER_HZ, which the kernel ABI fixes at 100.
const MILLIS_PER_TICK: u64 = 10;

/// Host memory totals in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryTotals {
    /// Installed memory
    pub total: u64,
    /// Memory not in use
    pub free: u64,
}

/// Source of raw statistics for the collector.
pub trait SystemProbe: Send + Sync {
    /// Named runtime counters of the current process.
    fn runtime_stats(&self) -> Result<Vec<(&'static str, f64)>>;

    /// Cumulative busy time per core, in milliseconds.
    fn cpu_busy_millis(&self) -> Result<Vec<u64>>;

    /// Host memory totals.
    fn memory(&self) -> Result<MemoryTotals>;
}

/// Probe backed by `sysinfo`, plus `/proc/stat` for per-core busy time.
pub struct HostProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl HostProbe {
    /// Probe for the current process.
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Cannot determine own pid, runtime stats disabled: {}", e);
                None
            },
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn runtime_stats(&self) -> Result<Vec<(&'static str, f64)>> {
        let pid = self.pid.ok_or_else(|| malformed("own pid unknown"))?;
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory().with_cpu().with_disk_usage(),
        );
        let process = system
            .process(pid)
            .ok_or_else(|| malformed(format!("process {} not visible", pid)))?;

        let disk = process.disk_usage();
        Ok(vec![
            ("ResidentMemory", process.memory() as f64),
            ("VirtualMemory", process.virtual_memory() as f64),
            ("RunTime", process.run_time() as f64),
            ("ProcessCPUUsage", f64::from(process.cpu_usage())),
            ("DiskReadBytes", disk.total_read_bytes as f64),
            ("DiskWrittenBytes", disk.total_written_bytes as f64),
        ])
    }

    fn cpu_busy_millis(&self) -> Result<Vec<u64>> {
        parse_cpu_busy(&read_proc("/proc/stat")?)
    }

    fn memory(&self) -> Result<MemoryTotals> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(malformed("host memory totals unavailable"));
        }
        Ok(MemoryTotals {
            total,
            free: system.free_memory(),
        })
    }
}

fn read_proc(path: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| MetricsError::Io(io::Error::new(e.kind(), format!("failed to read {}: {}", path, e))))
}

fn malformed<S: Into<String>>(msg: S) -> MetricsError {
    MetricsError::Io(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
}

fn parse_cpu_busy(content: &str) -> Result<Vec<u64>> {
    let mut cores = Vec::new();
    for line in content.lines() {
        let Some(rest) = line.strip_prefix("cpu") else {
            continue;
        };
        // Skip the aggregate "cpu " line
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let times: Vec<u64> = rest.split_whitespace().skip(1).filter_map(|v| v.parse().ok()).collect();
        if times.len() < 4 {
            return Err(malformed(format!("malformed cpu line: {}", line)));
        }
        // user nice system idle iowait irq softirq steal
        let total: u64 = times.iter().take(8).sum();
        let idle = times[3] + times.get(4).copied().unwrap_or(0);
        cores.push(total.saturating_sub(idle) * MILLIS_PER_TICK);
    }
    if cores.is_empty() {
        return Err(malformed("no per-core lines in /proc/stat"));
    }
    Ok(cores)
}
