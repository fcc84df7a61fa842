//! Dev-server presets started and stopped by kind (`npm`, `go`, `python`, `next`, `vite`).

use super::*;

#[derive(Debug, Clone, Copy)]
pub(super) struct DevServerPreset {
    pub(super) kind: &'static str,
    pub(super) command: &'static str,
    pub(super) args: &'static [&'static str],
    pub(super) error_patterns: &'static [&'static str],
    pub(super) auto_restart: bool,
}

const NODE_DEV_ERROR_PATTERNS: &[&str] = &["Error:", "Failed to compile", "Module not found"];

const DEV_SERVER_PRESETS: &[DevServerPreset] = &[
    DevServerPreset {
        kind: "npm",
        command: "npm",
        args: &["run", "dev"],
        error_patterns: NODE_DEV_ERROR_PATTERNS,
        auto_restart: true,
    },
    DevServerPreset {
        kind: "next",
        command: "npm",
        args: &["run", "dev"],
        error_patterns: NODE_DEV_ERROR_PATTERNS,
        auto_restart: true,
    },
    DevServerPreset {
        kind: "vite",
        command: "npm",
        args: &["run", "dev"],
        error_patterns: NODE_DEV_ERROR_PATTERNS,
        auto_restart: true,
    },
    DevServerPreset {
        kind: "go",
        command: "go",
        args: &["run", "main.go"],
        error_patterns: &["panic:", "fatal error:", "cannot find package"],
        auto_restart: true,
    },
    DevServerPreset {
        kind: "python",
        command: "python",
        args: &["app.py"],
        error_patterns: &["Traceback", "ImportError:", "SyntaxError:"],
        auto_restart: false,
    },
];

impl DevServerPreset {
    pub(super) fn to_command(self, workspace: &Path) -> ProcessCommand {
        ProcessCommand::new(self.command)
            .with_args(self.args.iter().copied())
            .with_working_dir(workspace)
            .with_auto_restart(self.auto_restart)
            .with_error_patterns(self.error_patterns.iter().copied())
    }
}

pub(super) fn find_dev_server_preset(kind: &str) -> Option<DevServerPreset> {
    let kind = kind.trim().to_ascii_lowercase();
    DEV_SERVER_PRESETS
        .iter()
        .find(|preset| preset.kind == kind)
        .copied()
}

#[derive(Debug, Clone, Serialize)]
pub(super) struct DevServerRecord {
    pub(super) kind: String,
    pub(super) pid: u32,
    pub(super) command: String,
    pub(super) started_unix_ms: u64,
}

pub(super) async fn handle_dev_server_start(
    State(state): State<Arc<ArgusGatewayState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    AxumPath(kind): AxumPath<String>,
) -> Response {
    let Some(preset) = find_dev_server_preset(&kind) else {
        return unsupported_dev_server(&kind).into_response();
    };
    let running_pid = lock_or_recover(&state.dev_servers)
        .get(preset.kind)
        .map(|record| record.pid);
    if let Some(pid) = running_pid {
        let still_running = state
            .supervisor
            .get_process(pid)
            .map(|process| process.status == ProcessStatus::Running)
            .unwrap_or(false);
        if still_running {
            return ApiError::conflict(
                "dev_server_running",
                format!("{} dev server already running with pid {pid}", preset.kind),
            )
            .into_response();
        }
    }
    if let Err(error) = enforce_start_rate_limit(&state, client.ip()) {
        return error.into_response();
    }

    let command = preset.to_command(state.workspace());
    let display = command.display_line();
    match state.supervisor.start(command) {
        Ok(process) => {
            lock_or_recover(&state.dev_servers).insert(
                preset.kind.to_string(),
                DevServerRecord {
                    kind: preset.kind.to_string(),
                    pid: process.pid,
                    command: display,
                    started_unix_ms: process.start_time_unix_ms,
                },
            );
            info!(kind = preset.kind, pid = process.pid, "dev server started");
            Json(json!({
                "message": format!("{} dev server started", preset.kind),
                "kind": preset.kind,
                "process": process,
            }))
            .into_response()
        }
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub(super) async fn handle_dev_server_stop(
    State(state): State<Arc<ArgusGatewayState>>,
    AxumPath(kind): AxumPath<String>,
) -> Response {
    let Some(preset) = find_dev_server_preset(&kind) else {
        return unsupported_dev_server(&kind).into_response();
    };
    let Some(record) = lock_or_recover(&state.dev_servers).remove(preset.kind) else {
        return ApiError::not_found(
            "dev_server_not_running",
            format!("no {} dev server is running", preset.kind),
        )
        .into_response();
    };

    match state.supervisor.stop(record.pid).await {
        Ok(()) | Err(SupervisorError::ProcessNotFound { .. }) => Json(json!({
            "message": format!("{} dev server stopped", preset.kind),
            "kind": preset.kind,
            "pid": record.pid,
        }))
        .into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub(super) async fn handle_dev_server_status(
    State(state): State<Arc<ArgusGatewayState>>,
) -> Response {
    let records = lock_or_recover(&state.dev_servers)
        .values()
        .cloned()
        .collect::<Vec<_>>();
    let dev_servers = records
        .into_iter()
        .map(|record| {
            let status = state
                .supervisor
                .get_process(record.pid)
                .map(|process| process.status.as_str())
                .unwrap_or("exited");
            json!({
                "kind": record.kind,
                "pid": record.pid,
                "command": record.command,
                "started_unix_ms": record.started_unix_ms,
                "status": status,
            })
        })
        .collect::<Vec<_>>();
    let available = DEV_SERVER_PRESETS
        .iter()
        .map(|preset| preset.kind)
        .collect::<Vec<_>>();
    Json(json!({
        "count": dev_servers.len(),
        "dev_servers": dev_servers,
        "available": available,
        "timestamp_unix_ms": current_unix_timestamp_ms(),
    }))
    .into_response()
}

fn unsupported_dev_server(kind: &str) -> ApiError {
    let available = DEV_SERVER_PRESETS
        .iter()
        .map(|preset| preset.kind)
        .collect::<Vec<_>>()
        .join(", ");
    ApiError::bad_request(
        "unsupported_dev_server",
        format!("unsupported dev server type '{kind}' (expected one of: {available})"),
    )
}
