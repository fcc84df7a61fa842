//! Argus gateway: axum router, shared state and server bootstrap.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use argus_core::{current_unix_timestamp_ms, lock_or_recover};
use argus_supervisor::{
    MonitoredProcess, OutputLog, ProcessCommand, ProcessStatus, ProcessSupervisor,
    StreamSubscription, SupervisorConfig, SupervisorError,
};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod dev_servers;
mod endpoints;
mod error_handlers;
mod process_handlers;
mod rate_limit;
mod server_bootstrap;
#[cfg(test)]
mod tests;
mod types;
mod websocket;

use dev_servers::{
    handle_dev_server_start, handle_dev_server_status, handle_dev_server_stop, DevServerRecord,
};
use endpoints::*;
use error_handlers::handle_recent_errors;
use process_handlers::{
    handle_process_metrics, handle_process_output, handle_process_start, handle_process_stop,
    handle_processes_monitored,
};
use rate_limit::{enforce_start_rate_limit, RateLimitState};
use types::ApiError;
use websocket::{handle_ws_errors_upgrade, handle_ws_processes_upgrade};

pub use server_bootstrap::{build_argus_gateway_router, run_argus_gateway_server};

/// Runtime settings for the gateway server.
#[derive(Debug, Clone)]
pub struct ArgusGatewayConfig {
    pub bind: String,
    pub workspace: PathBuf,
    pub supervisor: SupervisorConfig,
}

/// State shared by every handler.
pub struct ArgusGatewayState {
    config: ArgusGatewayConfig,
    supervisor: ProcessSupervisor,
    started_unix_ms: u64,
    rate_limit: Mutex<RateLimitState>,
    dev_servers: Mutex<BTreeMap<String, DevServerRecord>>,
}

impl ArgusGatewayState {
    pub fn new(config: ArgusGatewayConfig, supervisor: ProcessSupervisor) -> Self {
        Self {
            config,
            supervisor,
            started_unix_ms: current_unix_timestamp_ms(),
            rate_limit: Mutex::new(RateLimitState::default()),
            dev_servers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn workspace(&self) -> &Path {
        &self.config.workspace
    }

    /// Relative or empty working directories are anchored at the workspace root.
    fn resolve_working_dir(&self, requested: &Path) -> PathBuf {
        if requested.as_os_str().is_empty() {
            self.config.workspace.clone()
        } else if requested.is_relative() {
            self.config.workspace.join(requested)
        } else {
            requested.to_path_buf()
        }
    }
}

async fn handle_root_status(State(state): State<Arc<ArgusGatewayState>>) -> Response {
    let now = current_unix_timestamp_ms();
    let supervisor = state.supervisor();
    Json(json!({
        "service": "argus",
        "status": if supervisor.is_shutting_down() { "shutting_down" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "workspace": state.workspace().display().to_string(),
        "uptime_ms": now.saturating_sub(state.started_unix_ms),
        "processes": supervisor.process_count(),
        "stream_connections": supervisor.hub().len(),
        "timestamp_unix_ms": now,
    }))
    .into_response()
}
