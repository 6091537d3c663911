//! Domain model and shared plumbing for the agent and the server.
//!
//! The [`Metric`] type is the only entity that crosses the wire; everything
//! else here (errors, configuration, signatures, codecs, shutdown) is shared
//! infrastructure.

pub mod codec;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod signing;
pub mod subnet;
pub mod types;

/// Header in which agents report their own address
pub const REAL_IP_HEADER: &str = "X-Real-IP";

// Re-export commonly used types
pub use config::{
    AgentConfig, AgentConfigBuilder, DeliveryMode, ServerConfig, ServerConfigBuilder,
    StorageBackendKind, StorageConfig,
};
pub use error::{MetricsError, Result};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use subnet::TrustedSubnet;
pub use types::{Metric, MetricKind};
