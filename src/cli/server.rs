//! `runmetrics-server` command line.

use super::{init_logging, parse_duration, read_config_file, wait_for_signal};
use crate::core::{shutdown, Result, ServerConfig, ServerConfigBuilder, StorageBackendKind};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Receives metrics from agents and stores them
#[derive(Parser, Debug)]
#[command(name = "runmetrics-server")]
#[command(version, about, long_about = None)]
pub struct ServerCli {
    /// Listen address, host:port
    #[arg(short, long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Snapshot interval of the file backend; 0 snapshots after every write
    #[arg(short = 'i', long, env = "STORE_INTERVAL", value_parser = parse_duration)]
    pub store_interval: Option<Duration>,

    /// Snapshot file of the file backend
    #[arg(short = 'f', long, env = "STORE_FILE")]
    pub store_file: Option<PathBuf>,

    /// Restore the snapshot at startup
    #[arg(short, long, env = "RESTORE", action = clap::ArgAction::Set)]
    pub restore: Option<bool>,

    /// Relational database URL, selects the database backend
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Storage backend
    #[arg(long, env = "STORAGE", value_enum)]
    pub storage: Option<StorageBackendKind>,

    /// Key-value store directory
    #[arg(long, env = "KV_PATH")]
    pub kv_path: Option<PathBuf>,

    /// Shared HMAC key
    #[arg(short, long, env = "KEY")]
    pub key: Option<String>,

    /// PEM private key for request bodies
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR of trusted agents
    #[arg(short, long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// Configuration file path (default: ~/.config/runmetrics/server.yaml)
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "RUNMETRICS_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl ServerCli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        ServerCli::parse()
    }

    /// Load configuration: file first, then flags and environment on top.
    pub async fn load_config(&self) -> Result<ServerConfig> {
        let mut builder = ServerConfigBuilder::new();
        if let Some(content) = read_config_file(self.config.as_deref(), "server").await? {
            builder = builder.from_yaml(&content)?;
        }

        if let Some(address) = &self.address {
            builder = builder.address(address.as_str());
        }
        if let Some(interval) = self.store_interval {
            builder = builder.store_interval(interval);
        }
        if let Some(path) = &self.store_file {
            builder = builder.store_file(path.clone());
        }
        if let Some(restore) = self.restore {
            builder = builder.restore(restore);
        }
        if let Some(dsn) = &self.database_dsn {
            builder = builder.database_dsn(dsn.as_str());
        }
        if let Some(kind) = self.storage {
            builder = builder.storage_backend(kind);
        }
        if let Some(path) = &self.kv_path {
            builder = builder.kv_path(path.clone());
        }
        if let Some(key) = &self.key {
            builder = builder.hash_key(key.as_str());
        }
        if let Some(path) = &self.crypto_key {
            builder = builder.crypto_key(path.clone());
        }
        if let Some(cidr) = &self.trusted_subnet {
            builder = builder.trusted_subnet(cidr.as_str());
        }
        if self.debug {
            builder = builder.debug(true);
        }

        builder.build()
    }
}

/// Run the server until Ctrl-C or SIGTERM.
pub async fn execute(cli: ServerCli) -> Result<()> {
    let config = cli.load_config().await?;
    init_logging(&config.logging, config.debug)?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Address: {}", config.address);
        println!("  Storage: {:?}", config.storage.backend_kind());
        if let Some(subnet) = config.trusted_subnet()? {
            println!("  Trusted subnet: {}", subnet);
        }
        return Ok(());
    }

    let (trigger, shutdown) = shutdown::channel();
    let signal = tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    let result = crate::server::run(config, shutdown).await;
    signal.abort();
    result
}
