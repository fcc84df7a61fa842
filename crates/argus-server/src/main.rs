//! `argus` binary: supervises development processes and serves their error stream.

mod bootstrap_helpers;

use anyhow::Result;
use argus_cli::ArgusCli;
use argus_gateway::run_argus_gateway_server;
use clap::Parser;

use crate::bootstrap_helpers::{build_gateway_config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = ArgusCli::parse();
    let config = build_gateway_config(&cli)?;
    run_argus_gateway_server(config).await
}
