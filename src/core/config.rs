//! Configuration for the agent and the server.
//!
//! Both sides load in the same order:
//! - YAML file (optional)
//! - Environment variable and CLI overrides (see `crate::cli`)
//! - Validation

use crate::core::subnet::TrustedSubnet;
use crate::core::{MetricsError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default server address for both sides
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Server address, `host:port`
    pub address: String,
    /// Sampling interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Delivery interval
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
    /// Number of concurrent sender workers
    pub rate_limit: usize,
    /// Shared HMAC key, empty disables signing
    pub hash_key: String,
    /// PEM public key used to encrypt single-metric payloads
    pub crypto_key: Option<PathBuf>,
    /// Address reported in `X-Real-IP`, discovered when unset
    pub host_address: Option<IpAddr>,
    /// How the report loop delivers
    pub delivery_mode: DeliveryMode,
    /// Per-request timeout on the HTTP client
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub address: String,
    /// Shared HMAC key, empty disables verification
    pub hash_key: String,
    /// PEM private key used to decrypt request bodies
    pub crypto_key: Option<PathBuf>,
    /// CIDR of agents allowed to talk to the server
    pub trusted_subnet: Option<String>,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit backend; inferred from `database_dsn` when unset
    pub backend: Option<StorageBackendKind>,
    /// Snapshot file of the file backend
    pub store_file: PathBuf,
    /// Snapshot interval, zero snapshots after every write
    #[serde(with = "humantime_serde")]
    pub store_interval: Duration,
    /// Replay the snapshot file at startup
    pub restore: bool,
    /// Relational database URL, e.g. `sqlite:///var/lib/runmetrics/metrics.db`
    pub database_dsn: Option<String>,
    /// Relational connection pool size
    pub max_connections: u32,
    /// Key-value store directory (needs the `persistent` feature)
    pub kv_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// In-memory maps snapshotted to a file
    File,
    /// Relational database
    Database,
    /// Hash-per-metric key-value store
    Kv,
}

/// Delivery modes of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// One request per metric through the worker pool
    Single,
    /// One request carrying the whole batch
    Batch,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-request detail
    Trace,
    /// Diagnostic output
    Debug,
    /// Normal operation
    Info,
    /// Recoverable problems
    Warn,
    /// Failures only
    Error,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            address: DEFAULT_ADDRESS.to_string(),
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 100,
            hash_key: String::new(),
            crypto_key: None,
            host_address: None,
            delivery_mode: DeliveryMode::Batch,
            request_timeout: Duration::from_secs(5),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: DEFAULT_ADDRESS.to_string(),
            hash_key: String::new(),
            crypto_key: None,
            trusted_subnet: None,
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: None,
            store_file: PathBuf::from("/tmp/devops-metrics-db.json"),
            store_interval: Duration::from_secs(300),
            restore: true,
            database_dsn: None,
            max_connections: 5,
            kv_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl AgentConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(MetricsError::config("server address must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(MetricsError::config("poll_interval must be greater than 0"));
        }
        if self.report_interval.is_zero() {
            return Err(MetricsError::config("report_interval must be greater than 0"));
        }
        if self.rate_limit == 0 {
            return Err(MetricsError::config("rate_limit must be greater than 0"));
        }
        Ok(())
    }

    /// Base URL of the server
    pub fn server_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.address.trim_end_matches('/'))
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(MetricsError::config("listen address must not be empty"));
        }
        self.trusted_subnet()?;

        match self.storage.backend_kind() {
            StorageBackendKind::Database if self.storage.database_dsn.is_none() => {
                return Err(MetricsError::config("database backend requires database_dsn"));
            },
            StorageBackendKind::Database if self.storage.max_connections == 0 => {
                return Err(MetricsError::config("max_connections must be greater than 0"));
            },
            _ => {},
        }
        Ok(())
    }

    /// Parsed trusted subnet, `None` disables the check
    pub fn trusted_subnet(&self) -> Result<Option<TrustedSubnet>> {
        match self.trusted_subnet.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(cidr) => cidr.parse().map(Some),
        }
    }
}

impl StorageConfig {
    /// Backend to open: the explicit choice, else database when a DSN is set, else file
    pub fn backend_kind(&self) -> StorageBackendKind {
        match (self.backend, &self.database_dsn) {
            (Some(kind), _) => kind,
            (None, Some(_)) => StorageBackendKind::Database,
            (None, None) => StorageBackendKind::File,
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Programmatic construction of [`AgentConfig`]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        AgentConfigBuilder {
            config: AgentConfig::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| MetricsError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set server address
    pub fn address<S: Into<String>>(mut self, address: S) -> Self {
        self.config.address = address.into();
        self
    }

    /// Set poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set report interval
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.report_interval = interval;
        self
    }

    /// Set worker count
    pub fn rate_limit(mut self, limit: usize) -> Self {
        self.config.rate_limit = limit;
        self
    }

    /// Set HMAC key
    pub fn hash_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.hash_key = key.into();
        self
    }

    /// Set public key file
    pub fn crypto_key(mut self, path: PathBuf) -> Self {
        self.config.crypto_key = Some(path);
        self
    }

    /// Set reported host address
    pub fn host_address(mut self, addr: IpAddr) -> Self {
        self.config.host_address = Some(addr);
        self
    }

    /// Set delivery mode
    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.config.delivery_mode = mode;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<AgentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AgentConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Programmatic construction of [`ServerConfig`]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ServerConfigBuilder {
            config: ServerConfig::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| MetricsError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set listen address
    pub fn address<S: Into<String>>(mut self, address: S) -> Self {
        self.config.address = address.into();
        self
    }

    /// Set HMAC key
    pub fn hash_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.hash_key = key.into();
        self
    }

    /// Set private key file
    pub fn crypto_key(mut self, path: PathBuf) -> Self {
        self.config.crypto_key = Some(path);
        self
    }

    /// Set trusted subnet CIDR
    pub fn trusted_subnet<S: Into<String>>(mut self, cidr: S) -> Self {
        self.config.trusted_subnet = Some(cidr.into());
        self
    }

    /// Set storage backend
    pub fn storage_backend(mut self, kind: StorageBackendKind) -> Self {
        self.config.storage.backend = Some(kind);
        self
    }

    /// Set snapshot file
    pub fn store_file(mut self, path: PathBuf) -> Self {
        self.config.storage.store_file = path;
        self
    }

    /// Set snapshot interval
    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.config.storage.store_interval = interval;
        self
    }

    /// Enable restore from the snapshot file
    pub fn restore(mut self, restore: bool) -> Self {
        self.config.storage.restore = restore;
        self
    }

    /// Set database URL
    pub fn database_dsn<S: Into<String>>(mut self, dsn: S) -> Self {
        self.config.storage.database_dsn = Some(dsn.into());
        self
    }

    /// Set key-value store directory
    pub fn kv_path(mut self, path: PathBuf) -> Self {
        self.config.storage.kv_path = Some(path);
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
