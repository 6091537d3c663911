//! runmetrics agent entry point.

use anyhow::Context;
use runmetrics_lib::cli::{agent, AgentCli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = AgentCli::parse_args();
    agent::execute(cli).await.context("agent failed")
}
