use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3002";
pub const WORKSPACE_FALLBACK_ENV: &str = "WORKSPACE_PATH";

fn parse_port(value: &str) -> Result<u16, String> {
    let parsed = value
        .trim()
        .parse::<u16>()
        .map_err(|error| format!("failed to parse port: {error}"))?;
    if parsed == 0 {
        return Err("port must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "argus",
    about = "Supervises development processes and streams their classified errors",
    version
)]
pub struct ArgusCli {
    #[arg(
        env = "ARGUS_WORKSPACE",
        help = "Workspace root used as the default working directory. Falls back to WORKSPACE_PATH, then the current directory."
    )]
    pub workspace: Option<PathBuf>,

    #[arg(
        long,
        env = "ARGUS_BIND",
        default_value = DEFAULT_BIND_ADDR,
        help = "Socket address for the HTTP and WebSocket server."
    )]
    pub bind: String,

    #[arg(
        long,
        env = "ARGUS_PORT",
        value_parser = parse_port,
        help = "Overrides the port of --bind."
    )]
    pub port: Option<u16>,

    #[arg(
        long,
        env = "ARGUS_CONFIG",
        help = "JSON supervisor config file. Defaults to argus-config.json in the current directory when present."
    )]
    pub config: Option<PathBuf>,
}

impl ArgusCli {
    pub fn resolve_bind_addr(&self) -> Result<SocketAddr> {
        let mut addr = self
            .bind
            .trim()
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid --bind '{}'", self.bind))?;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        Ok(addr)
    }

    pub fn resolve_workspace(&self) -> Result<PathBuf> {
        self.resolve_workspace_with(|key| std::env::var(key).ok())
    }

    /// Workspace precedence: positional / `ARGUS_WORKSPACE`, `WORKSPACE_PATH`, current dir.
    pub fn resolve_workspace_with<F>(&self, lookup: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let requested = match self.workspace.as_ref() {
            Some(path) => path.clone(),
            None => match lookup(WORKSPACE_FALLBACK_ENV).filter(|value| !value.trim().is_empty()) {
                Some(value) => PathBuf::from(value.trim()),
                None => std::env::current_dir().context("failed to resolve current directory")?,
            },
        };
        canonical_workspace(&requested)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn canonical_workspace(path: &Path) -> Result<PathBuf> {
    let resolved = std::fs::canonicalize(path)
        .with_context(|| format!("workspace '{}' does not exist", path.display()))?;
    if !resolved.is_dir() {
        anyhow::bail!("workspace '{}' is not a directory", resolved.display());
    }
    Ok(resolved)
}
