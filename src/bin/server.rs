//! runmetrics server entry point.

use anyhow::Context;
use runmetrics_lib::cli::{server, ServerCli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = ServerCli::parse_args();
    server::execute(cli).await.context("server failed")
}
