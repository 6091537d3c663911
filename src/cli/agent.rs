//! `runmetrics-agent` command line.

use super::{init_logging, parse_duration, read_config_file, wait_for_signal};
use crate::agent::Agent;
use crate::core::{shutdown, AgentConfig, AgentConfigBuilder, DeliveryMode, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Samples runtime and host metrics and reports them to a collector server
#[derive(Parser, Debug)]
#[command(name = "runmetrics-agent")]
#[command(version, about, long_about = None)]
pub struct AgentCli {
    /// Server address, host:port
    #[arg(short, long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Sampling interval (seconds, or e.g. 500ms)
    #[arg(short, long, env = "POLL_INTERVAL", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Reporting interval (seconds, or e.g. 1m)
    #[arg(short, long, env = "REPORT_INTERVAL", value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Maximum concurrent requests in single delivery mode
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// Shared HMAC key
    #[arg(short, long, env = "KEY")]
    pub key: Option<String>,

    /// PEM public key of the server
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Address to report in X-Real-IP (discovered when unset)
    #[arg(long, env = "HOST_ADDRESS")]
    pub host_address: Option<IpAddr>,

    /// One request per metric, or one request per batch
    #[arg(long, env = "DELIVERY_MODE", value_enum)]
    pub delivery_mode: Option<DeliveryMode>,

    /// Configuration file path (default: ~/.config/runmetrics/agent.yaml)
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "RUNMETRICS_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl AgentCli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        AgentCli::parse()
    }

    /// Load configuration: file first, then flags and environment on top.
    pub async fn load_config(&self) -> Result<AgentConfig> {
        let mut builder = AgentConfigBuilder::new();
        if let Some(content) = read_config_file(self.config.as_deref(), "agent").await? {
            builder = builder.from_yaml(&content)?;
        }

        if let Some(address) = &self.address {
            builder = builder.address(address.as_str());
        }
        if let Some(interval) = self.poll_interval {
            builder = builder.poll_interval(interval);
        }
        if let Some(interval) = self.report_interval {
            builder = builder.report_interval(interval);
        }
        if let Some(limit) = self.rate_limit {
            builder = builder.rate_limit(limit);
        }
        if let Some(key) = &self.key {
            builder = builder.hash_key(key.as_str());
        }
        if let Some(path) = &self.crypto_key {
            builder = builder.crypto_key(path.clone());
        }
        if let Some(addr) = self.host_address {
            builder = builder.host_address(addr);
        }
        if let Some(mode) = self.delivery_mode {
            builder = builder.delivery_mode(mode);
        }
        if self.debug {
            builder = builder.debug(true);
        }

        builder.build()
    }
}

/// Run the agent until Ctrl-C or SIGTERM.
pub async fn execute(cli: AgentCli) -> Result<()> {
    let config = cli.load_config().await?;
    init_logging(&config.logging, config.debug)?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Server: {}", config.address);
        println!("  Poll interval: {:?}", config.poll_interval);
        println!("  Report interval: {:?}", config.report_interval);
        println!("  Rate limit: {}", config.rate_limit);
        println!("  Delivery mode: {:?}", config.delivery_mode);
        return Ok(());
    }

    let agent = Agent::from_config(config).await?;
    let (trigger, shutdown) = shutdown::channel();
    let signal = tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    let result = agent.run(shutdown).await;
    signal.abort();
    result
}
