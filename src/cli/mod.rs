//! Command-line interfaces of the agent and the server.
//!
//! Configuration precedence, highest first:
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Config file (`--config`, else `~/.config/runmetrics/<name>.yaml` if present)
//! 4. Defaults

use crate::core::config::LoggingConfig;
use crate::core::{MetricsError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod agent;
pub mod server;

pub use agent::AgentCli;
pub use server::ServerCli;

/// Read the explicit config file, or the default one when it exists.
///
/// An explicit file that cannot be read is an error; a missing default file is not.
pub async fn read_config_file(explicit: Option<&Path>, default_name: &str) -> Result<Option<String>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path(default_name) {
            Some(path) if path.exists() => path,
            _ => return Ok(None),
        },
    };

    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            tracing::info!("Loaded configuration from: {:?}", path);
            Ok(Some(content))
        },
        Err(e) if explicit.is_some() => {
            Err(MetricsError::config(format!("Failed to read config file {:?}: {}", path, e)))
        },
        Err(_) => {
            tracing::debug!("No config file found at {:?}, using defaults", path);
            Ok(None)
        },
    }
}

fn default_config_path(name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("runmetrics").join(format!("{}.yaml", name)))
}

/// Parse an interval: bare integers are seconds, anything else is humantime (`500ms`, `1m`).
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|e| format!("invalid duration '{}': {}", value, e))
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over everything; otherwise `--debug` forces debug level,
/// else the configured level applies.
pub fn init_logging(logging: &LoggingConfig, debug: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if debug { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = if logging.structured {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).compact()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| MetricsError::config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Completes on Ctrl-C, or SIGTERM on Unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
