//! In-memory storage with newline-delimited JSON snapshots.
//!
//! Gauges and counters live in separate maps. Counter updates go through the
//! map's entry API, which holds the shard lock for the read-modify-write.

use super::backend::{admit, admit_query, missing, seal, MetricStorage};
use crate::core::{Metric, MetricKind, MetricsError, Result, Shutdown};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Map-backed storage, optionally persisted to a snapshot file.
pub struct FileStorage {
    gauges: DashMap<String, f64>,
    counters: DashMap<String, i64>,
    store_file: Option<PathBuf>,
    store_interval: Duration,
    /// Serializes snapshot writers so the temp file is never shared.
    snapshot_lock: Mutex<()>,
}

impl FileStorage {
    /// Storage persisted to `store_file`.
    ///
    /// A zero `store_interval` writes the snapshot after every save.
    pub fn new(store_file: impl Into<PathBuf>, store_interval: Duration) -> Self {
        Self {
            gauges: DashMap::new(),
            counters: DashMap::new(),
            store_file: Some(store_file.into()),
            store_interval,
            snapshot_lock: Mutex::new(()),
        }
    }

    /// Storage that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            gauges: DashMap::new(),
            counters: DashMap::new(),
            store_file: None,
            store_interval: Duration::ZERO,
            snapshot_lock: Mutex::new(()),
        }
    }

    /// Snapshot file, if any
    pub fn store_file(&self) -> Option<&Path> {
        self.store_file.as_deref()
    }

    fn snapshots_on_write(&self) -> bool {
        self.store_file.is_some() && self.store_interval.is_zero()
    }

    fn apply(&self, metric: &Metric) -> Result<()> {
        match (&metric.kind, metric.value, metric.delta) {
            (MetricKind::Gauge, Some(value), _) => {
                self.gauges.insert(metric.id.clone(), value);
                Ok(())
            },
            (MetricKind::Counter, _, Some(delta)) => {
                let mut sum = self.counters.entry(metric.id.clone()).or_insert(0);
                *sum = sum.checked_add(delta).ok_or_else(|| {
                    MetricsError::bad_request(format!("counter '{}' would overflow", metric.id))
                })?;
                Ok(())
            },
            _ => metric.validate(),
        }
    }

    fn dump(&self) -> Vec<Metric> {
        let mut all = Vec::with_capacity(self.gauges.len() + self.counters.len());
        all.extend(self.gauges.iter().map(|e| Metric::gauge(e.key().clone(), *e.value())));
        all.extend(self.counters.iter().map(|e| Metric::counter(e.key().clone(), *e.value())));
        all
    }

    /// Write the whole state to the snapshot file.
    ///
    /// The data goes to `<file>.tmp` first and is renamed over the target.
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> Result<usize> {
        let Some(path) = self.store_file.as_deref() else {
            return Ok(0);
        };
        let _guard = self.snapshot_lock.lock().await;

        let metrics = self.dump();
        let mut body = Vec::with_capacity(metrics.len() * 64);
        for metric in &metrics {
            serde_json::to_writer(&mut body, metric)?;
            body.push(b'\n');
        }

        let tmp = temp_path(path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;

        debug!("Wrote {} metrics to {:?}", metrics.len(), path);
        Ok(metrics.len())
    }

    /// Replay the snapshot file into the maps.
    ///
    /// A missing file restores nothing. A malformed line aborts the restore.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<usize> {
        let Some(path) = self.store_file.as_deref() else {
            return Ok(0);
        };
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No snapshot at {:?}, starting empty", path);
                return Ok(0);
            },
            Err(e) => return Err(e.into()),
        };

        let mut restored = 0;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let metric: Metric = serde_json::from_str(line)?;
            admit(&metric, "")?;
            self.apply(&metric)?;
            restored += 1;
        }
        info!("Restored {} metrics from {:?}", restored, path);
        Ok(restored)
    }

    /// Spawn the periodic snapshot task.
    ///
    /// The task writes one final snapshot when `shutdown` fires. With a zero
    /// interval it only waits for shutdown since every save already persisted.
    pub fn spawn_snapshot_task(self: &Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        let storage = Arc::clone(self);
        tokio::spawn(async move {
            if storage.store_interval.is_zero() {
                shutdown.triggered().await;
            } else {
                let mut ticker = tokio::time::interval(storage.store_interval);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = storage.snapshot().await {
                                error!("Periodic snapshot failed: {}", e);
                            }
                        }
                        _ = shutdown.triggered() => break,
                    }
                }
            }

            match storage.snapshot().await {
                Ok(count) => info!("Final snapshot written ({} metrics)", count),
                Err(e) => error!("Final snapshot failed: {}", e),
            }
        })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait::async_trait]
impl MetricStorage for FileStorage {
    #[instrument(skip(self, metric, key), fields(id = %metric.id, kind = %metric.kind))]
    async fn save_metric(&self, metric: Metric, key: &str) -> Result<()> {
        admit(&metric, key)?;
        self.apply(&metric)?;

        if self.snapshots_on_write() {
            if let Err(e) = self.snapshot().await {
                warn!("Synchronous snapshot failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn get_metric(&self, query: Metric, key: &str) -> Result<Metric> {
        admit_query(&query)?;
        let found = match query.kind {
            MetricKind::Gauge => self.gauges.get(&query.id).map(|v| Metric::gauge(query.id.clone(), *v)),
            MetricKind::Counter => {
                self.counters.get(&query.id).map(|d| Metric::counter(query.id.clone(), *d))
            },
            MetricKind::Unknown(_) => None,
        };
        seal(found.ok_or_else(|| missing(&query))?, key)
    }

    async fn get_all_metrics(&self) -> Result<Vec<Metric>> {
        Ok(self.dump())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
