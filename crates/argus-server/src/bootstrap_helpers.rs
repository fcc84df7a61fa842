use anyhow::{Context, Result};
use argus_cli::ArgusCli;
use argus_gateway::ArgusGatewayConfig;
use argus_supervisor::load_supervisor_config;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Resolves CLI flags, the config file and environment overrides into gateway settings.
pub(crate) fn build_gateway_config(cli: &ArgusCli) -> Result<ArgusGatewayConfig> {
    let bind = cli.resolve_bind_addr()?;
    let workspace = cli.resolve_workspace()?;
    let supervisor =
        load_supervisor_config(cli.config_path()).context("failed to load supervisor config")?;
    Ok(ArgusGatewayConfig {
        bind: bind.to_string(),
        workspace,
        supervisor,
    })
}
