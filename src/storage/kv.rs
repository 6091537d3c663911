//! Key-value storage with one hash record per `kind:id`.
//!
//! The record store itself only offers get/put/scan, so counter updates take a
//! lock scoped to the record key for the read-add-write sequence.

use super::backend::{admit, admit_query, missing, seal, MetricStorage};
use crate::core::{Metric, MetricKind, MetricsError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Stored form of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric name
    pub id: String,
    /// `gauge` or `counter`
    #[serde(rename = "type")]
    pub kind: String,
    /// Gauge value
    #[serde(default)]
    pub value: Option<f64>,
    /// Counter sum
    #[serde(default)]
    pub delta: Option<i64>,
    /// Signature, when one was supplied
    #[serde(default)]
    pub hash: Option<String>,
}

impl MetricRecord {
    fn into_metric(self) -> Metric {
        Metric {
            id: self.id,
            kind: MetricKind::from(self.kind),
            delta: self.delta,
            value: self.value,
            hash: None,
        }
    }
}

/// Minimal record store the key-value backend is built on.
pub trait HashStore: Send + Sync {
    /// Read the record under `key`.
    fn get(&self, key: &str) -> Result<Option<MetricRecord>>;

    /// Replace the record under `key`.
    fn put(&self, key: &str, record: &MetricRecord) -> Result<()>;

    /// Every stored record.
    fn scan(&self) -> Result<Vec<MetricRecord>>;

    /// Connectivity check.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local record store.
#[derive(Debug, Default)]
pub struct MemoryHashStore {
    records: DashMap<String, MetricRecord>,
}

impl MemoryHashStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashStore for MemoryHashStore {
    fn get(&self, key: &str) -> Result<Option<MetricRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn put(&self, key: &str, record: &MetricRecord) -> Result<()> {
        self.records.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn scan(&self) -> Result<Vec<MetricRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

/// RocksDB record store, records encoded as JSON.
#[cfg(feature = "persistent")]
pub struct RocksHashStore {
    db: rocksdb::DB,
}

#[cfg(feature = "persistent")]
impl RocksHashStore {
    /// Open or create the database directory at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let mut options = rocksdb::Options::default();
        options.create_if_missing(true);
        let db = rocksdb::DB::open(&options, path)
            .map_err(|e| MetricsError::storage(format!("failed to open {:?}: {}", path, e)))?;
        Ok(Self { db })
    }
}

#[cfg(feature = "persistent")]
impl HashStore for RocksHashStore {
    fn get(&self, key: &str) -> Result<Option<MetricRecord>> {
        let bytes = self.db.get(key.as_bytes()).map_err(|e| MetricsError::storage(e.to_string()))?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, record: &MetricRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.db.put(key.as_bytes(), bytes).map_err(|e| MetricsError::storage(e.to_string()))
    }

    fn scan(&self) -> Result<Vec<MetricRecord>> {
        let mut records = Vec::new();
        for item in self.db.iterator(rocksdb::IteratorMode::Start) {
            let (_, value) = item.map_err(|e| MetricsError::storage(e.to_string()))?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn ping(&self) -> Result<()> {
        self.db
            .property_value("rocksdb.estimate-num-keys")
            .map(|_| ())
            .map_err(|e| MetricsError::storage(e.to_string()))
    }
}

/// Key-value storage over any [`HashStore`].
pub struct KvStorage<S> {
    store: S,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: HashStore> KvStorage<S> {
    /// Storage over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(key.to_string()).or_default().value())
    }

    fn add_to_counter(&self, id: &str, key: &str, delta: i64) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let current = self.store.get(key)?.and_then(|r| r.delta).unwrap_or(0);
        let sum = current.checked_add(delta).ok_or_else(|| {
            MetricsError::bad_request(format!("counter '{}' would overflow", id))
        })?;
        self.store.put(
            key,
            &MetricRecord {
                id: id.to_string(),
                kind: MetricKind::Counter.to_string(),
                value: None,
                delta: Some(sum),
                hash: None,
            },
        )
    }
}

impl KvStorage<MemoryHashStore> {
    /// Storage over a fresh in-process record store.
    pub fn in_memory() -> Self {
        Self::new(MemoryHashStore::new())
    }
}

#[async_trait::async_trait]
impl<S: HashStore> MetricStorage for KvStorage<S> {
    #[instrument(skip(self, metric, key), fields(id = %metric.id, kind = %metric.kind))]
    async fn save_metric(&self, metric: Metric, key: &str) -> Result<()> {
        admit(&metric, key)?;
        let record_key = metric.storage_key();
        match (&metric.kind, metric.value, metric.delta) {
            (MetricKind::Gauge, Some(value), _) => self.store.put(
                &record_key,
                &MetricRecord {
                    id: metric.id.clone(),
                    kind: MetricKind::Gauge.to_string(),
                    value: Some(value),
                    delta: None,
                    hash: metric.hash.clone(),
                },
            ),
            (MetricKind::Counter, _, Some(delta)) => self.add_to_counter(&metric.id, &record_key, delta),
            _ => metric.validate(),
        }
    }

    async fn get_metric(&self, query: Metric, key: &str) -> Result<Metric> {
        admit_query(&query)?;
        match self.store.get(&query.storage_key())? {
            Some(record) => seal(record.into_metric(), key),
            None => Err(missing(&query)),
        }
    }

    async fn get_all_metrics(&self) -> Result<Vec<Metric>> {
        Ok(self.store.scan()?.into_iter().map(MetricRecord::into_metric).collect())
    }

    async fn check(&self) -> Result<()> {
        self.store.ping()
    }

    fn name(&self) -> &'static str {
        "kv"
    }
}
