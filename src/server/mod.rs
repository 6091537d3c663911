//! Collector server: HTTP ingestion in front of a storage backend.

use crate::core::codec::PayloadDecryptor;
use crate::core::{MetricsError, Result, ServerConfig, Shutdown, TrustedSubnet};
use crate::storage::{self, MetricStorage};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub mod http;
pub mod middleware;

pub use http::{create_router, HttpError};

/// Shared state of the request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Metric storage backend
    pub storage: Arc<dyn MetricStorage>,
    /// Shared HMAC key, empty disables verification and signing
    pub key: Arc<str>,
    /// Private key for encrypted request bodies
    pub decryptor: Option<Arc<PayloadDecryptor>>,
    /// Only agents in this subnet may post when set
    pub trusted_subnet: Option<TrustedSubnet>,
}

impl AppState {
    /// State without encryption or subnet restrictions.
    pub fn new(storage: Arc<dyn MetricStorage>, key: &str) -> Self {
        Self {
            storage,
            key: Arc::from(key),
            decryptor: None,
            trusted_subnet: None,
        }
    }

    /// Decrypt request bodies with `decryptor`.
    pub fn with_decryptor(mut self, decryptor: PayloadDecryptor) -> Self {
        self.decryptor = Some(Arc::new(decryptor));
        self
    }

    /// Reject requests whose real IP lies outside `subnet`.
    pub fn with_trusted_subnet(mut self, subnet: TrustedSubnet) -> Self {
        self.trusted_subnet = Some(subnet);
        self
    }
}

/// Serve `app` on `listener` until `shutdown` fires, finishing open requests.
pub async fn serve(listener: TcpListener, app: Router, shutdown: Shutdown) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
        .map_err(|e| MetricsError::network(format!("HTTP server error: {}", e)))
}

/// Open storage, bind the listener and serve until `shutdown` fires.
///
/// After a graceful stop the file backend's final snapshot is awaited.
pub async fn run(config: ServerConfig, shutdown: Shutdown) -> Result<()> {
    config.validate()?;

    let opened = storage::open_storage(&config.storage, shutdown.clone()).await?;
    let mut state = AppState::new(opened.storage, &config.hash_key);
    if let Some(path) = &config.crypto_key {
        state = state.with_decryptor(PayloadDecryptor::from_file(path).await?);
        info!("Decrypting request bodies with {:?}", path);
    }
    if let Some(subnet) = config.trusted_subnet()? {
        info!("Accepting agents from {}", subnet);
        state = state.with_trusted_subnet(subnet);
    }

    let listener = TcpListener::bind(&config.address).await.map_err(|e| {
        MetricsError::network(format!("Failed to bind HTTP server to {}: {}", config.address, e))
    })?;
    info!("Metrics server listening on {}", config.address);

    let result = serve(listener, create_router(state), shutdown).await;

    if let Some(task) = opened.background {
        if result.is_ok() {
            if let Err(e) = task.await {
                error!("Snapshot task failed: {}", e);
            }
        } else {
            task.abort();
        }
    }
    info!("Metrics server stopped");
    result
}
