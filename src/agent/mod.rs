//! Metrics agent: samples the host and the process and ships the samples
//! to the collector server.

use crate::core::codec::PayloadEncryptor;
use crate::core::{AgentConfig, Result, Shutdown};
use std::sync::Arc;
use tracing::{error, info};

pub mod collector;
pub mod probe;
pub mod scheduler;
pub mod sender;
pub mod transport;

// Re-export commonly used types
pub use collector::Collector;
pub use probe::{HostProbe, SystemProbe};
pub use scheduler::Scheduler;
pub use sender::Sender;
pub use transport::{HttpTransport, Transport};

/// A configured agent ready to run.
pub struct Agent {
    config: AgentConfig,
    collector: Arc<Collector>,
    scheduler: Scheduler,
}

impl Agent {
    /// Wire collector, HTTP transport and sender from the configuration.
    ///
    /// An unreadable public key is logged and payloads go out unencrypted.
    pub async fn from_config(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        let host_address = transport::resolve_host_address(&config).await;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config, host_address)?);
        let mut sender = Sender::new(transport, config.hash_key.clone(), config.rate_limit);
        if let Some(path) = &config.crypto_key {
            match PayloadEncryptor::from_file(path).await {
                Ok(encryptor) => sender = sender.with_encryptor(encryptor),
                Err(e) => error!("Payload encryption disabled: {}", e),
            }
        }

        info!(
            "Agent reporting to {} as {} ({:?} mode, {} workers)",
            config.address, host_address, config.delivery_mode, config.rate_limit
        );
        Ok(Self::with_parts(config, Arc::new(Collector::new()), Arc::new(sender)))
    }

    /// Agent over an existing collector and sender.
    pub fn with_parts(config: AgentConfig, collector: Arc<Collector>, sender: Arc<Sender>) -> Self {
        let scheduler = Scheduler::new(
            Arc::clone(&collector),
            sender,
            config.poll_interval,
            config.report_interval,
            config.delivery_mode,
        );
        Self {
            config,
            collector,
            scheduler,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Shared collector
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Run until `shutdown` fires.
    pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
        self.scheduler.run(shutdown).await
    }
}
