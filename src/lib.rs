//! runmetrics - runtime and host metrics pipeline.
//!
//! An agent samples process and host statistics and ships them to a
//! collector server, which keeps the current value of every metric behind a
//! pluggable storage backend.
//!
//! # Features
//!
//! - **Two metric kinds**: gauges (last write wins) and counters (running sums)
//! - **Bounded delivery**: a rate-limited worker pool or one batch per report
//! - **Integrity**: HMAC-SHA-256 signatures under a shared key
//! - **Payload protection**: gzip plus optional RSA encryption
//! - **Pluggable storage**: snapshotted memory, SQLite, or a key-value store
//!
//! # Architecture
//!
//! - `core`: metric model, errors, configuration, signing, codecs
//! - `agent`: collector, sender, scheduler
//! - `storage`: the storage contract and its backends
//! - `server`: HTTP ingestion
//! - `cli`: command-line interfaces of both binaries
//!
//! # Example
//!
//! ```no_run
//! use runmetrics_lib::core::{shutdown, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (_trigger, shutdown) = shutdown::channel();
//!     runmetrics_lib::server::run(ServerConfig::default(), shutdown).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod agent;
pub mod cli;
pub mod core;
pub mod server;
pub mod storage;

// Re-export core types for convenience
pub use crate::core::{Metric, MetricKind, MetricsError, Result};
