//! Gateway tests grouped by endpoint behavior.
use super::error_handlers::parse_since_window;
use super::process_handlers::parse_output_line_limit;
use super::*;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tempfile::tempdir;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as ClientWsMessage},
};

type ClientSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        allowed_commands: vec!["sh".to_string(), "echo".to_string(), "sleep".to_string()],
        worker_count: 2,
        stop_timeout: Duration::from_secs(2),
        status_broadcast_interval: Duration::from_millis(100),
        ..SupervisorConfig::default()
    }
}

fn test_state(workspace: &Path, supervisor_config: SupervisorConfig) -> Arc<ArgusGatewayState> {
    let supervisor =
        ProcessSupervisor::launch(supervisor_config.clone()).expect("launch supervisor");
    Arc::new(ArgusGatewayState::new(
        ArgusGatewayConfig {
            bind: "127.0.0.1:0".to_string(),
            workspace: workspace.to_path_buf(),
            supervisor: supervisor_config,
        },
        supervisor,
    ))
}

async fn spawn_test_server(
    state: Arc<ArgusGatewayState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral listener")?;
    let addr = listener.local_addr().context("resolve listener addr")?;
    let app = build_argus_gateway_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok((addr, handle))
}

async fn start_process(client: &Client, addr: SocketAddr, body: Value) -> reqwest::Response {
    client
        .post(format!("http://{addr}{PROCESSES_START_ENDPOINT}"))
        .json(&body)
        .send()
        .await
        .expect("send start request")
}

async fn fetch_output(client: &Client, addr: SocketAddr, pid: u64, query: &str) -> Value {
    client
        .get(format!("http://{addr}/processes/{pid}/output?{query}"))
        .send()
        .await
        .expect("send output request")
        .json::<Value>()
        .await
        .expect("parse output payload")
}

async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

async fn connect_stream_ws(addr: SocketAddr, endpoint: &str) -> Result<ClientSocket> {
    let request = format!("ws://{addr}{endpoint}")
        .into_client_request()
        .context("failed to construct websocket request")?;
    let (socket, _) = connect_async(request)
        .await
        .context("failed to establish websocket connection")?;
    Ok(socket)
}

async fn recv_stream_ws_json(socket: &mut ClientSocket) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let Some(message) = socket.next().await else {
                panic!("websocket closed before json frame");
            };
            let message = message.expect("read websocket frame");
            match message {
                ClientWsMessage::Text(text) => {
                    return serde_json::from_str::<Value>(text.as_str())
                        .expect("websocket text frame should contain json");
                }
                ClientWsMessage::Ping(payload) => {
                    socket
                        .send(ClientWsMessage::Pong(payload))
                        .await
                        .expect("send pong");
                }
                ClientWsMessage::Pong(_) => continue,
                ClientWsMessage::Binary(_) => continue,
                ClientWsMessage::Close(_) => panic!("websocket closed before json frame"),
                ClientWsMessage::Frame(_) => continue,
            }
        }
    })
    .await
    .expect("websocket frame should arrive before timeout")
}

#[test]
fn unit_parse_output_line_limit_defaults_and_clamps() {
    assert_eq!(parse_output_line_limit(None), DEFAULT_OUTPUT_LINES);
    assert_eq!(parse_output_line_limit(Some("abc")), DEFAULT_OUTPUT_LINES);
    assert_eq!(parse_output_line_limit(Some("7")), 7);
    assert_eq!(parse_output_line_limit(Some(" 12 ")), 12);
    assert_eq!(parse_output_line_limit(Some("0")), 0);
    assert_eq!(parse_output_line_limit(Some("-3")), 0);
}

#[test]
fn unit_parse_since_window_falls_back_to_five_minutes() {
    assert_eq!(
        parse_since_window(Some("30s")),
        ("30s".to_string(), Duration::from_secs(30))
    );
    assert_eq!(
        parse_since_window(Some("2h")),
        ("2h".to_string(), Duration::from_secs(7_200))
    );
    let fallback = ("5m".to_string(), Duration::from_secs(300));
    assert_eq!(parse_since_window(None), fallback);
    assert_eq!(parse_since_window(Some("")), fallback);
    assert_eq!(parse_since_window(Some("soon")), fallback);
}

#[test]
fn unit_api_error_maps_supervisor_errors_to_status_codes() {
    let cases = [
        (
            SupervisorError::ProcessLimitReached { limit: 1 },
            StatusCode::SERVICE_UNAVAILABLE,
            "process_limit_reached",
        ),
        (
            SupervisorError::ProcessNotFound { pid: 42 },
            StatusCode::NOT_FOUND,
            "process_not_found",
        ),
        (
            SupervisorError::ShuttingDown,
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting_down",
        ),
        (
            SupervisorError::SpawnFailed {
                command: "sh".to_string(),
                source: std::io::Error::other("boom"),
            },
            StatusCode::INTERNAL_SERVER_ERROR,
            "spawn_failed",
        ),
    ];
    for (error, status, code) in cases {
        let api_error = ApiError::from(error);
        assert_eq!(api_error.status, status);
        assert_eq!(api_error.code, code);
    }
}

#[tokio::test]
async fn functional_root_status_reports_service_and_workspace() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");

    let payload = Client::new()
        .get(format!("http://{addr}{ROOT_ENDPOINT}"))
        .send()
        .await
        .expect("send root request")
        .json::<Value>()
        .await
        .expect("parse root payload");
    assert_eq!(payload["service"], "argus");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["processes"], 0);
    assert_eq!(
        payload["workspace"],
        temp.path().display().to_string().as_str()
    );

    handle.abort();
}

#[tokio::test]
async fn functional_start_process_captures_stdout_in_workspace() {
    let temp = tempdir().expect("tempdir");
    std::fs::write(temp.path().join("marker.txt"), "workspace-marker\n").expect("write marker");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");
    let client = Client::new();

    let response = start_process(
        &client,
        addr,
        json!({"command": "sh", "args": ["-c", "echo hello; cat marker.txt"]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = response.json::<Value>().await.expect("parse start payload");
    assert_eq!(payload["message"], "process started");
    let pid = payload["process"]["pid"].as_u64().expect("pid");
    assert!(pid > 0);
    assert_eq!(payload["process"]["command"], "sh");

    let mut output = Value::Null;
    for _ in 0..100 {
        output = fetch_output(&client, addr, pid, "lines=10").await;
        if output["lines"].as_u64() == Some(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(output["stream"], "combined");
    assert_eq!(output["output"], json!(["hello", "workspace-marker"]));

    let list = client
        .get(format!("http://{addr}{PROCESSES_MONITORED_ENDPOINT}"))
        .send()
        .await
        .expect("send list request")
        .json::<Value>()
        .await
        .expect("parse list payload");
    assert_eq!(list["count"], 1);
    assert_eq!(list["processes"][0]["pid"].as_u64(), Some(pid));

    state.supervisor().stop_all().await;
    handle.abort();
}

#[tokio::test]
async fn regression_start_rejects_disallowed_command_with_invalid_request_error() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");

    let response = start_process(
        &Client::new(),
        addr,
        json!({"command": "rm", "args": ["-rf", "/tmp/argus-nothing"]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = response.json::<Value>().await.expect("parse error payload");
    assert_eq!(payload["error"]["type"], "invalid_request_error");
    assert_eq!(payload["error"]["code"], "invalid_command");
    assert_eq!(state.supervisor().process_count(), 0);

    handle.abort();
}

#[tokio::test]
async fn regression_start_rejects_malformed_json_body() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");

    let response = Client::new()
        .post(format!("http://{addr}{PROCESSES_START_ENDPOINT}"))
        .header("content-type", "application/json")
        .body("{\"command\": ")
        .send()
        .await
        .expect("send start request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = response.json::<Value>().await.expect("parse error payload");
    assert_eq!(payload["error"]["code"], "malformed_json");

    handle.abort();
}

#[tokio::test]
async fn regression_start_rate_limit_rejects_excess_requests_per_client() {
    let temp = tempdir().expect("tempdir");
    let config = SupervisorConfig {
        rate_limit_per_minute: 2,
        ..test_supervisor_config()
    };
    let state = test_state(temp.path(), config);
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");
    let client = Client::new();
    let body = json!({"command": "echo", "args": ["ok"]});

    for _ in 0..2 {
        let response = start_process(&client, addr, body.clone()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let rejected = start_process(&client, addr, body).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    let payload = rejected.json::<Value>().await.expect("parse error payload");
    assert_eq!(payload["error"]["code"], "rate_limited");
    assert_eq!(lock_or_recover(&state.rate_limit).rate_limited_requests, 1);

    state.supervisor().stop_all().await;
    handle.abort();
}

#[tokio::test]
async fn regression_start_beyond_process_limit_returns_service_unavailable() {
    let temp = tempdir().expect("tempdir");
    let config = SupervisorConfig {
        max_processes: 1,
        ..test_supervisor_config()
    };
    let state = test_state(temp.path(), config);
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");
    let client = Client::new();

    let first = start_process(&client, addr, json!({"command": "sleep", "args": ["5"]})).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = start_process(&client, addr, json!({"command": "sleep", "args": ["5"]})).await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = second.json::<Value>().await.expect("parse error payload");
    assert_eq!(payload["error"]["type"], "server_error");
    assert_eq!(payload["error"]["code"], "process_limit_reached");
    assert_eq!(state.supervisor().process_count(), 1);

    state.supervisor().stop_all().await;
    handle.abort();
}

#[tokio::test]
async fn functional_stop_endpoint_terminates_process_and_forgets_pid() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");
    let client = Client::new();

    let started = start_process(&client, addr, json!({"command": "sleep", "args": ["30"]}))
        .await
        .json::<Value>()
        .await
        .expect("parse start payload");
    let pid = started["process"]["pid"].as_u64().expect("pid");

    let stopped = client
        .delete(format!("http://{addr}/processes/{pid}"))
        .send()
        .await
        .expect("send stop request");
    assert_eq!(stopped.status(), StatusCode::OK);
    let payload = stopped.json::<Value>().await.expect("parse stop payload");
    assert_eq!(payload["pid"].as_u64(), Some(pid));
    assert_eq!(state.supervisor().process_count(), 0);

    let again = client
        .delete(format!("http://{addr}/processes/{pid}"))
        .send()
        .await
        .expect("send second stop request");
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    handle.abort();
}

#[tokio::test]
async fn regression_pid_path_segments_are_validated() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let client = Client::new();

    let invalid = client
        .delete(format!("http://{addr}/processes/not-a-pid"))
        .send()
        .await
        .expect("send stop request");
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    let payload = invalid.json::<Value>().await.expect("parse error payload");
    assert_eq!(payload["error"]["code"], "invalid_pid");

    let unknown = client
        .get(format!("http://{addr}/processes/999999/output"))
        .send()
        .await
        .expect("send output request");
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    handle.abort();
}

#[tokio::test]
async fn functional_output_streams_and_recent_errors_reflect_classified_stderr() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");
    let client = Client::new();

    let started = start_process(
        &client,
        addr,
        json!({"command": "sh", "args": ["-c", "echo ready; echo 'panic: boom' >&2"]}),
    )
    .await
    .json::<Value>()
    .await
    .expect("parse start payload");
    let pid = started["process"]["pid"].as_u64().expect("pid");
    let pid_u32 = u32::try_from(pid).expect("pid fits u32");

    let supervisor = state.supervisor().clone();
    assert!(
        wait_until(Duration::from_secs(3), || {
            supervisor
                .get_process(pid_u32)
                .map(|process| !process.error_lines.is_empty())
                .unwrap_or(false)
        })
        .await,
        "expected stderr panic to be classified"
    );

    let stderr = fetch_output(&client, addr, pid, "stream=stderr").await;
    assert_eq!(stderr["stream"], "stderr");
    assert_eq!(stderr["output"], json!(["panic: boom"]));
    let errors = fetch_output(&client, addr, pid, "stream=errors&lines=0").await;
    assert_eq!(errors["stream"], "errors");
    assert_eq!(errors["lines"], 1);

    let mut combined = Value::Null;
    for _ in 0..100 {
        combined = fetch_output(&client, addr, pid, "lines=0").await;
        if combined["lines"].as_u64() == Some(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(combined["stream"], "combined");
    let mut combined_lines = combined["output"]
        .as_array()
        .expect("output array")
        .iter()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>();
    combined_lines.sort_unstable();
    assert_eq!(combined_lines, vec!["panic: boom", "ready"]);

    let invalid_stream = client
        .get(format!("http://{addr}/processes/{pid}/output?stream=video"))
        .send()
        .await
        .expect("send output request");
    assert_eq!(invalid_stream.status(), StatusCode::BAD_REQUEST);

    let recent = client
        .get(format!("http://{addr}{ERRORS_LATEST_ENDPOINT}?since=whenever"))
        .send()
        .await
        .expect("send errors request")
        .json::<Value>()
        .await
        .expect("parse errors payload");
    assert_eq!(recent["since"], "5m");
    assert_eq!(recent["error_count"], 1);
    assert_eq!(recent["errors"][0]["process_pid"].as_u64(), Some(pid));
    assert_eq!(recent["errors"][0]["error_type"], "runtime");
    assert_eq!(recent["errors"][0]["severity"], "error");

    let streamed = client
        .get(format!("http://{addr}{ERRORS_STREAM_ENDPOINT}?since=1m"))
        .send()
        .await
        .expect("send errors stream request")
        .json::<Value>()
        .await
        .expect("parse errors stream payload");
    assert_eq!(streamed["since"], "1m");
    assert_eq!(streamed["error_count"], 1);

    let metrics = client
        .get(format!("http://{addr}{PROCESSES_METRICS_ENDPOINT}"))
        .send()
        .await
        .expect("send metrics request")
        .json::<Value>()
        .await
        .expect("parse metrics payload");
    assert_eq!(metrics["metrics"]["total_errors"], 1);
    assert_eq!(metrics["metrics"]["start_attempts"], 1);

    state.supervisor().stop_all().await;
    handle.abort();
}

#[tokio::test]
async fn functional_dev_server_endpoints_report_presets_and_missing_servers() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let client = Client::new();

    let status = client
        .get(format!("http://{addr}{DEV_STATUS_ENDPOINT}"))
        .send()
        .await
        .expect("send dev status request")
        .json::<Value>()
        .await
        .expect("parse dev status payload");
    assert_eq!(status["count"], 0);
    assert_eq!(
        status["available"],
        json!(["npm", "next", "vite", "go", "python"])
    );

    let unsupported = client
        .post(format!("http://{addr}/dev/start/rails"))
        .send()
        .await
        .expect("send dev start request");
    assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
    let payload = unsupported
        .json::<Value>()
        .await
        .expect("parse error payload");
    assert_eq!(payload["error"]["code"], "unsupported_dev_server");

    let not_running = client
        .post(format!("http://{addr}/dev/stop/go"))
        .send()
        .await
        .expect("send dev stop request");
    assert_eq!(not_running.status(), StatusCode::NOT_FOUND);

    handle.abort();
}

#[test]
fn unit_dev_server_presets_build_workspace_commands() {
    let preset = dev_servers::find_dev_server_preset(" Python ").expect("python preset");
    let command = preset.to_command(Path::new("/srv/app"));
    assert_eq!(command.command, "python");
    assert_eq!(command.args, vec!["app.py".to_string()]);
    assert_eq!(command.working_dir, PathBuf::from("/srv/app"));
    assert!(!command.auto_restart);
    assert!(command
        .error_patterns
        .iter()
        .any(|pattern| pattern == "Traceback"));

    let go = dev_servers::find_dev_server_preset("go").expect("go preset");
    assert!(go.auto_restart);
    assert!(dev_servers::find_dev_server_preset("rails").is_none());
}

#[tokio::test]
async fn integration_ws_errors_stream_greets_and_forwards_classified_errors() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");

    let mut socket = connect_stream_ws(addr, WS_ERRORS_ENDPOINT)
        .await
        .expect("connect websocket");
    let greeting = recv_stream_ws_json(&mut socket).await;
    assert_eq!(greeting["type"], "connection");

    let hub = state.supervisor().hub();
    assert!(wait_until(Duration::from_secs(2), || hub.len() == 1).await);

    let response = start_process(
        &Client::new(),
        addr,
        json!({"command": "sh", "args": ["-c", "echo 'panic: boom' >&2"]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let frame = recv_stream_ws_json(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["error"]["message"], "panic: boom");
    assert_eq!(frame["error"]["source"], "stderr");
    assert_eq!(frame["error"]["command"], "sh");

    socket.close(None).await.expect("close websocket");
    assert!(wait_until(Duration::from_secs(2), || hub.is_empty()).await);

    state.supervisor().stop_all().await;
    handle.abort();
}

#[tokio::test]
async fn integration_ws_processes_stream_sends_snapshot_then_periodic_updates() {
    let temp = tempdir().expect("tempdir");
    let state = test_state(temp.path(), test_supervisor_config());
    let (addr, handle) = spawn_test_server(state.clone())
        .await
        .expect("spawn server");
    state
        .supervisor()
        .start(ProcessCommand::new("sleep").with_args(["5"]).with_working_dir(temp.path()))
        .expect("start sleep");

    let mut socket = connect_stream_ws(addr, WS_PROCESSES_ENDPOINT)
        .await
        .expect("connect websocket");
    let snapshot = recv_stream_ws_json(&mut socket).await;
    assert_eq!(snapshot["type"], "process_status");
    assert_eq!(
        snapshot["processes"].as_array().map(Vec::len),
        Some(1)
    );
    assert_eq!(snapshot["processes"][0]["command"], "sleep");

    let update = recv_stream_ws_json(&mut socket).await;
    assert_eq!(update["type"], "process_update");
    assert_eq!(update["processes"][0]["status"], "running");

    state.supervisor().stop_all().await;
    handle.abort();
}
