//! Metric storage.
//!
//! Three interchangeable backends share the [`MetricStorage`] contract:
//! a snapshotted in-memory store, a relational store and a key-value store.
//! The server picks one at startup through [`open_storage`].

use crate::core::{MetricsError, Result, Shutdown, StorageBackendKind, StorageConfig};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod backend;
pub mod file;
pub mod kv;
pub mod relational;

// Re-export commonly used types
pub use backend::MetricStorage;
pub use file::FileStorage;
#[cfg(feature = "persistent")]
pub use kv::RocksHashStore;
pub use kv::{HashStore, KvStorage, MemoryHashStore, MetricRecord};
pub use relational::RelationalStorage;

/// A backend ready for use, plus its background task if it has one.
pub struct OpenedStorage {
    /// The selected backend
    pub storage: Arc<dyn MetricStorage>,
    /// Snapshot task of the file backend. Completes after the final snapshot.
    pub background: Option<JoinHandle<()>>,
}

/// Open the backend selected by `config`.
///
/// The file backend restores its snapshot when asked to and starts the
/// snapshot task. A failed restore is logged and the server starts with
/// whatever was applied before the failure.
pub async fn open_storage(config: &StorageConfig, shutdown: Shutdown) -> Result<OpenedStorage> {
    match config.backend_kind() {
        StorageBackendKind::File => {
            let storage = Arc::new(FileStorage::new(&config.store_file, config.store_interval));
            if config.restore {
                if let Err(e) = storage.restore().await {
                    error!("Failed to restore metrics from {:?}: {}", config.store_file, e);
                }
            }
            let background = Some(storage.spawn_snapshot_task(shutdown));
            info!(
                "Using file storage at {:?} (interval {:?})",
                config.store_file, config.store_interval
            );
            Ok(OpenedStorage {
                storage,
                background,
            })
        },
        StorageBackendKind::Database => {
            let dsn = config
                .database_dsn
                .as_deref()
                .ok_or_else(|| MetricsError::config("database backend requires database_dsn"))?;
            let storage = RelationalStorage::connect(dsn, config.max_connections).await?;
            info!("Using relational storage");
            Ok(OpenedStorage {
                storage: Arc::new(storage),
                background: None,
            })
        },
        StorageBackendKind::Kv => open_kv(config),
    }
}

#[cfg(feature = "persistent")]
fn open_kv(config: &StorageConfig) -> Result<OpenedStorage> {
    let storage: Arc<dyn MetricStorage> = match &config.kv_path {
        Some(path) => {
            info!("Using key-value storage at {:?}", path);
            Arc::new(KvStorage::new(RocksHashStore::open(path)?))
        },
        None => {
            info!("Using in-process key-value storage");
            Arc::new(KvStorage::in_memory())
        },
    };
    Ok(OpenedStorage {
        storage,
        background: None,
    })
}

#[cfg(not(feature = "persistent"))]
fn open_kv(config: &StorageConfig) -> Result<OpenedStorage> {
    if let Some(path) = &config.kv_path {
        return Err(MetricsError::config(format!(
            "kv_path {:?} needs the `persistent` feature",
            path
        )));
    }
    info!("Using in-process key-value storage");
    Ok(OpenedStorage {
        storage: Arc::new(KvStorage::in_memory()),
        background: None,
    })
}
