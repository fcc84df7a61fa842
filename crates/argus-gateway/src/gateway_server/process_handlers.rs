//! Process lifecycle endpoints.

use super::types::{parse_json_body, parse_pid, OutputQuery, ProcessListResponse};
use super::*;

pub(super) async fn handle_processes_monitored(
    State(state): State<Arc<ArgusGatewayState>>,
) -> Response {
    let processes = state.supervisor.list();
    Json(ProcessListResponse {
        count: processes.len(),
        processes,
        timestamp_unix_ms: current_unix_timestamp_ms(),
    })
    .into_response()
}

pub(super) async fn handle_process_metrics(State(state): State<Arc<ArgusGatewayState>>) -> Response {
    Json(json!({
        "metrics": state.supervisor.metrics(),
        "processes": state.supervisor.process_count(),
        "max_processes": state.supervisor.config().max_processes,
        "stream_connections": state.supervisor.hub().len(),
        "timestamp_unix_ms": current_unix_timestamp_ms(),
    }))
    .into_response()
}

pub(super) async fn handle_process_start(
    State(state): State<Arc<ArgusGatewayState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    if let Err(error) = enforce_start_rate_limit(&state, client.ip()) {
        return error.into_response();
    }
    let mut command = match parse_json_body::<ProcessCommand>(&body) {
        Ok(command) => command,
        Err(error) => return error.into_response(),
    };
    command.working_dir = state.resolve_working_dir(&command.working_dir);

    match state.supervisor.start(command) {
        Ok(process) => Json(json!({
            "message": "process started",
            "process": process,
        }))
        .into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub(super) async fn handle_process_stop(
    State(state): State<Arc<ArgusGatewayState>>,
    AxumPath(raw_pid): AxumPath<String>,
) -> Response {
    let pid = match parse_pid(&raw_pid) {
        Ok(pid) => pid,
        Err(error) => return error.into_response(),
    };
    match state.supervisor.stop(pid).await {
        Ok(()) => Json(json!({
            "message": format!("process {pid} stopped"),
            "pid": pid,
        }))
        .into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub(super) async fn handle_process_output(
    State(state): State<Arc<ArgusGatewayState>>,
    AxumPath(raw_pid): AxumPath<String>,
    Query(query): Query<OutputQuery>,
) -> Response {
    let pid = match parse_pid(&raw_pid) {
        Ok(pid) => pid,
        Err(error) => return error.into_response(),
    };
    let log = match query.stream.as_deref() {
        None => OutputLog::Combined,
        Some(raw) => match OutputLog::parse(raw) {
            Some(log) => log,
            None => {
                return ApiError::bad_request(
                    "invalid_stream",
                    format!("unknown output stream '{raw}' (expected combined, stdout, stderr or errors)"),
                )
                .into_response();
            }
        },
    };
    let lines = parse_output_line_limit(query.lines.as_deref());

    match state.supervisor.get_output(pid, lines, log) {
        Ok(output) => Json(json!({
            "pid": pid,
            "stream": log.as_str(),
            "lines": output.len(),
            "output": output,
        }))
        .into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

/// `lines` defaults to 50 when absent or unparseable; zero or negative means all lines.
pub(super) fn parse_output_line_limit(raw: Option<&str>) -> usize {
    match raw.map(str::trim).and_then(|value| value.parse::<i64>().ok()) {
        None => DEFAULT_OUTPUT_LINES,
        Some(value) if value <= 0 => 0,
        Some(value) => usize::try_from(value).unwrap_or(usize::MAX),
    }
}
