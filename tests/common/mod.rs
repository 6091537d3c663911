//! Common test utilities and fixtures.

#![allow(dead_code)]

use runmetrics_lib::agent::probe::{MemoryTotals, SystemProbe};
use runmetrics_lib::agent::Collector;
use runmetrics_lib::core::Result;
use runmetrics_lib::storage::{FileStorage, KvStorage, MetricStorage, RelationalStorage};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A storage backend under test, with whatever keeps its files alive.
pub struct Backend {
    pub name: &'static str,
    pub storage: Arc<dyn MetricStorage>,
    _dir: Option<TempDir>,
}

/// One instance of every backend, each starting empty.
pub async fn all_backends() -> Vec<Backend> {
    let file_dir = TempDir::new().unwrap();
    let file = FileStorage::new(file_dir.path().join("metrics.json"), Duration::from_secs(300));

    let db_dir = TempDir::new().unwrap();
    let dsn = format!("sqlite://{}", db_dir.path().join("metrics.db").display());
    let relational = RelationalStorage::connect(&dsn, 5).await.unwrap();

    vec![
        Backend {
            name: "file",
            storage: Arc::new(file),
            _dir: Some(file_dir),
        },
        Backend {
            name: "database",
            storage: Arc::new(relational),
            _dir: Some(db_dir),
        },
        Backend {
            name: "kv",
            storage: Arc::new(KvStorage::in_memory()),
            _dir: None,
        },
    ]
}

/// Probe with fixed readings so batches have a stable shape.
pub struct StaticProbe;

impl SystemProbe for StaticProbe {
    fn runtime_stats(&self) -> Result<Vec<(&'static str, f64)>> {
        Ok(vec![("ResidentMemory", 8_388_608.0), ("Threads", 4.0), ("MinorFaults", 120.0)])
    }

    fn cpu_busy_millis(&self) -> Result<Vec<u64>> {
        Ok(vec![1_000, 2_000])
    }

    fn memory(&self) -> Result<MemoryTotals> {
        Ok(MemoryTotals {
            total: 16 * 1024 * 1024 * 1024,
            free: 4 * 1024 * 1024 * 1024,
        })
    }
}

/// Collector over [`StaticProbe`] that has sampled `polls` times.
pub fn sampled_collector(polls: usize) -> Collector {
    let collector = Collector::with_probe(Box::new(StaticProbe));
    for _ in 0..polls {
        collector.collect_runtime_statistics();
    }
    collector.collect_host_utilization();
    collector
}
