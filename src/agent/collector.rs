//! Sampling of runtime and host metrics.
//!
//! The poll loop calls the `collect_*` methods; the report loop takes a
//! [`Collector::batch`] of whatever was sampled last.

use super::probe::{HostProbe, SystemProbe};
use crate::core::Metric;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Name of the sample counter
pub const POLL_COUNT: &str = "PollCount";
/// Name of the random gauge
pub const RANDOM_VALUE: &str = "RandomValue";
/// Prefix of per-core utilization gauges, numbered from 1
pub const CPU_UTILIZATION: &str = "CPUutilization";
/// Name of the installed host memory gauge
pub const TOTAL_MEMORY: &str = "TotalMemory";
/// Name of the free host memory gauge
pub const FREE_MEMORY: &str = "FreeMemory";

/// Previous per-core busy readings for utilization deltas.
struct HostState {
    busy_millis: Vec<u64>,
    sampled_at: Instant,
    gauges: Vec<Metric>,
}

/// Metric sampler shared by the poll and report loops.
pub struct Collector {
    probe: Box<dyn SystemProbe>,
    poll_count: AtomicI64,
    runtime: RwLock<Vec<Metric>>,
    host: Mutex<HostState>,
}

impl Collector {
    /// Collector reading the local host
    pub fn new() -> Self {
        Self::with_probe(Box::new(HostProbe::new()))
    }

    /// Collector over any probe. Takes the first CPU reading immediately so
    /// the first host sample already has a baseline.
    pub fn with_probe(probe: Box<dyn SystemProbe>) -> Self {
        let busy_millis = probe.cpu_busy_millis().unwrap_or_default();
        Self {
            probe,
            poll_count: AtomicI64::new(0),
            runtime: RwLock::new(Vec::new()),
            host: Mutex::new(HostState {
                busy_millis,
                sampled_at: Instant::now(),
                gauges: Vec::new(),
            }),
        }
    }

    /// Refresh the runtime gauges and count one sample.
    ///
    /// A failed read keeps the previous gauges; the sample is counted anyway.
    pub fn collect_runtime_statistics(&self) {
        match self.probe.runtime_stats() {
            Ok(stats) => {
                let gauges = stats.into_iter().map(|(name, value)| Metric::gauge(name, value)).collect();
                *self.runtime.write() = gauges;
            },
            Err(e) => warn!("Failed to read runtime statistics: {}", e),
        }
        let count = self.poll_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Runtime sample {}", count);
    }

    /// Refresh per-core utilization and memory totals.
    ///
    /// Memory and CPU are read independently. A failed read is logged and
    /// its gauges omitted until the next successful read.
    pub fn collect_host_utilization(&self) {
        let mut host = self.host.lock();
        let mut gauges = Vec::with_capacity(host.busy_millis.len() + 2);

        match self.probe.memory() {
            Ok(memory) => {
                gauges.push(Metric::gauge(TOTAL_MEMORY, memory.total as f64));
                gauges.push(Metric::gauge(FREE_MEMORY, memory.free as f64));
            },
            Err(e) => warn!("Failed to read host memory: {}", e),
        }

        match self.probe.cpu_busy_millis() {
            Ok(busy) => {
                let now = Instant::now();
                let elapsed_ms = now.duration_since(host.sampled_at).as_secs_f64() * 1000.0;
                if elapsed_ms > 0.0 {
                    for (core, now_busy) in busy.iter().enumerate() {
                        let prev = host.busy_millis.get(core).copied().unwrap_or(*now_busy);
                        let utilization = now_busy.saturating_sub(prev) as f64 / elapsed_ms;
                        gauges.push(Metric::gauge(format!("{}{}", CPU_UTILIZATION, core + 1), utilization));
                    }
                }
                host.busy_millis = busy;
                host.sampled_at = now;
            },
            Err(e) => warn!("Failed to read host CPU times: {}", e),
        }

        host.gauges = gauges;
    }

    /// One uniformly random gauge in `[0, 1000)`.
    pub fn collect_random_gauge(&self) -> Metric {
        Metric::gauge(RANDOM_VALUE, rand::thread_rng().gen::<f64>() * 1000.0)
    }

    /// Current sample counter
    pub fn poll_count(&self) -> i64 {
        self.poll_count.load(Ordering::SeqCst)
    }

    /// Everything sampled so far, plus a fresh random gauge and the sample counter.
    pub fn batch(&self) -> Vec<Metric> {
        let runtime = self.runtime.read();
        let host = self.host.lock();
        let mut batch = Vec::with_capacity(runtime.len() + host.gauges.len() + 2);
        batch.extend(runtime.iter().cloned());
        batch.push(self.collect_random_gauge());
        batch.extend(host.gauges.iter().cloned());
        batch.push(Metric::counter(POLL_COUNT, self.poll_count()));
        batch
    }

    /// Subtract `sent` from the sample counter after a delivered batch.
    ///
    /// Samples taken while the batch was in flight stay counted.
    pub fn acknowledge_poll_count(&self, sent: i64) {
        self.poll_count.fetch_sub(sent, Ordering::SeqCst);
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::probe::MemoryTotals;
    use crate::core::{MetricKind, MetricsError, Result};
    use std::sync::atomic::AtomicU64;

    /// Probe returning scripted readings; each CPU read advances core 0 by `step`.
    pub(crate) struct FakeProbe {
        busy: AtomicU64,
        step: u64,
        fail_memory: bool,
        fail_cpu: bool,
    }

    impl FakeProbe {
        pub(crate) fn new(step: u64) -> Self {
            Self {
                busy: AtomicU64::new(0),
                step,
                fail_memory: false,
                fail_cpu: false,
            }
        }
    }

    impl SystemProbe for FakeProbe {
        fn runtime_stats(&self) -> Result<Vec<(&'static str, f64)>> {
            Ok(vec![("ResidentMemory", 4096.0), ("Threads", 3.0)])
        }

        fn cpu_busy_millis(&self) -> Result<Vec<u64>> {
            if self.fail_cpu {
                return Err(MetricsError::network("no procfs"));
            }
            let busy = self.busy.fetch_add(self.step, Ordering::SeqCst);
            Ok(vec![busy, 0])
        }

        fn memory(&self) -> Result<MemoryTotals> {
            if self.fail_memory {
                return Err(MetricsError::network("no procfs"));
            }
            Ok(MemoryTotals {
                total: 8192,
                free: 1024,
            })
        }
    }

    fn find<'a>(batch: &'a [Metric], id: &str) -> Option<&'a Metric> {
        batch.iter().find(|m| m.id == id)
    }

    #[test]
    fn test_runtime_statistics_count_samples() {
        let collector = Collector::with_probe(Box::new(FakeProbe::new(0)));
        collector.collect_runtime_statistics();
        collector.collect_runtime_statistics();

        let batch = collector.batch();
        assert_eq!(find(&batch, POLL_COUNT).and_then(|m| m.delta), Some(2));
        assert_eq!(find(&batch, "ResidentMemory").and_then(|m| m.value), Some(4096.0));
        assert!(find(&batch, RANDOM_VALUE).is_some());
    }

    #[test]
    fn test_host_utilization_gauges() {
        let collector = Collector::with_probe(Box::new(FakeProbe::new(5)));
        std::thread::sleep(std::time::Duration::from_millis(10));
        collector.collect_host_utilization();

        let batch = collector.batch();
        assert_eq!(find(&batch, TOTAL_MEMORY).and_then(|m| m.value), Some(8192.0));
        assert_eq!(find(&batch, FREE_MEMORY).and_then(|m| m.value), Some(1024.0));
        let core1 = find(&batch, "CPUutilization1").and_then(|m| m.value).unwrap();
        assert!(core1 > 0.0 && core1 <= 0.5);
        assert_eq!(find(&batch, "CPUutilization2").and_then(|m| m.value), Some(0.0));
    }

    #[test]
    fn test_host_failure_omits_gauges() {
        let mut probe = FakeProbe::new(1);
        probe.fail_memory = true;
        probe.fail_cpu = true;
        let collector = Collector::with_probe(Box::new(probe));
        collector.collect_host_utilization();

        let batch = collector.batch();
        assert!(find(&batch, TOTAL_MEMORY).is_none());
        assert!(batch.iter().all(|m| !m.id.starts_with(CPU_UTILIZATION)));
    }

    #[test]
    fn test_cpu_failure_keeps_memory_gauges() {
        let mut probe = FakeProbe::new(1);
        probe.fail_cpu = true;
        let collector = Collector::with_probe(Box::new(probe));
        collector.collect_host_utilization();

        let batch = collector.batch();
        assert_eq!(find(&batch, TOTAL_MEMORY).and_then(|m| m.value), Some(8192.0));
        assert_eq!(find(&batch, FREE_MEMORY).and_then(|m| m.value), Some(1024.0));
        assert!(batch.iter().all(|m| !m.id.starts_with(CPU_UTILIZATION)));
    }

    #[test]
    fn test_memory_failure_keeps_cpu_gauges() {
        let mut probe = FakeProbe::new(5);
        probe.fail_memory = true;
        let collector = Collector::with_probe(Box::new(probe));
        std::thread::sleep(std::time::Duration::from_millis(10));
        collector.collect_host_utilization();

        let batch = collector.batch();
        assert!(find(&batch, TOTAL_MEMORY).is_none());
        assert!(find(&batch, "CPUutilization1").is_some());
    }

    #[test]
    fn test_acknowledge_keeps_in_flight_samples() {
        let collector = Collector::with_probe(Box::new(FakeProbe::new(0)));
        for _ in 0..3 {
            collector.collect_runtime_statistics();
        }
        let sent = collector.poll_count();
        collector.collect_runtime_statistics();
        collector.acknowledge_poll_count(sent);
        assert_eq!(collector.poll_count(), 1);
    }

    #[test]
    fn test_random_gauge_range() {
        let collector = Collector::with_probe(Box::new(FakeProbe::new(0)));
        let metric = collector.collect_random_gauge();
        assert_eq!(metric.kind, MetricKind::Gauge);
        let value = metric.value.unwrap();
        assert!((0.0..1000.0).contains(&value));
    }
}
