#![cfg(unix)]

use std::{
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::Duration,
};

use argus_gateway::{build_argus_gateway_router, ArgusGatewayConfig, ArgusGatewayState};
use argus_supervisor::{
    read_config_file, ConnectionError, ErrorType, ProcessCommand, ProcessStatus,
    ProcessSupervisor, StreamConnection, StreamSubscription, SupervisorConfig,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
struct CollectingConnection {
    frames: AsyncMutex<Vec<Value>>,
}

impl CollectingConnection {
    async fn frames_of_type(&self, frame_type: &str) -> Vec<Value> {
        self.frames
            .lock()
            .await
            .iter()
            .filter(|frame| frame["type"] == frame_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StreamConnection for CollectingConnection {
    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError> {
        let frame = serde_json::from_str::<Value>(payload)
            .map_err(|error| ConnectionError::Write(error.to_string()))?;
        self.frames.lock().await.push(frame);
        Ok(())
    }

    async fn close(&self) {}
}

fn write_config(root: &Path, body: Value) -> SupervisorConfig {
    let path = root.join("argus-config.json");
    std::fs::write(&path, body.to_string()).expect("write config file");
    let config = read_config_file(&path).expect("read config file");
    config.validate().expect("valid config");
    config
}

async fn eventually<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    probe().await
}

#[tokio::test]
async fn integration_compilation_error_flows_from_stdout_to_stream_connection() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let config = write_config(
        workspace.path(),
        json!({
            "allowed_commands": ["sh"],
            "worker_count": 2,
            "stop_timeout": "2s",
            "status_broadcast_interval": "100ms",
        }),
    );
    let supervisor = ProcessSupervisor::launch(config).expect("launch supervisor");
    let collector = Arc::new(CollectingConnection::default());
    supervisor
        .hub()
        .add(collector.clone(), StreamSubscription::ErrorsAndStatus);

    let process = supervisor
        .start(
            ProcessCommand::new("sh")
                .with_args([
                    "-c",
                    "echo compiling; echo 'SyntaxError: Unexpected token in src/app.ts:3:7'; sleep 1",
                ])
                .with_working_dir(workspace.path()),
        )
        .expect("start process");
    assert_eq!(process.status, ProcessStatus::Running);

    let collector_probe = collector.clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let collector = collector_probe.clone();
            async move { !collector.frames_of_type("error").await.is_empty() }
        })
        .await,
        "expected classified error frame"
    );
    let errors = collector.frames_of_type("error").await;
    let error = &errors[0]["error"];
    assert_eq!(error["process_pid"].as_u64(), Some(u64::from(process.pid)));
    assert_eq!(error["error_type"], "compilation");
    assert_eq!(error["source"], "stdout");
    assert_eq!(error["line"], 3);
    assert_eq!(error["column"], 7);
    assert_eq!(
        error["context"],
        json!(["compiling", "SyntaxError: Unexpected token in src/app.ts:3:7"])
    );

    let collector_probe = collector.clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let collector = collector_probe.clone();
            async move { !collector.frames_of_type("process_update").await.is_empty() }
        })
        .await,
        "expected periodic process_update frame"
    );

    let latest = supervisor.latest_errors(Duration::from_secs(60));
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].error_type, ErrorType::Compilation);

    supervisor.stop_all().await;
    assert_eq!(supervisor.process_count(), 0);
}

#[tokio::test]
async fn integration_http_surface_applies_caller_patterns_and_stops_processes() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let supervisor_config = write_config(
        workspace.path(),
        json!({
            "allowed_commands": ["sh"],
            "worker_count": 2,
            "stop_timeout": "2s",
        }),
    );
    let supervisor =
        ProcessSupervisor::launch(supervisor_config.clone()).expect("launch supervisor");
    let state = Arc::new(ArgusGatewayState::new(
        ArgusGatewayConfig {
            bind: "127.0.0.1:0".to_string(),
            workspace: workspace.path().to_path_buf(),
            supervisor: supervisor_config,
        },
        supervisor.clone(),
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    let app = build_argus_gateway_router(state);
    let server = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = reqwest::Client::new();
    let started = client
        .post(format!("http://{addr}/processes/start"))
        .json(&json!({
            "command": "sh",
            "args": ["-c", "echo 'WATCHDOG tripped'; sleep 30"],
            "error_patterns": ["^WATCHDOG"],
        }))
        .send()
        .await
        .expect("send start request");
    assert_eq!(started.status(), reqwest::StatusCode::OK);
    let started = started.json::<Value>().await.expect("parse start payload");
    let pid = started["process"]["pid"].as_u64().expect("pid");

    let errors_client = client.clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let client = errors_client.clone();
            async move {
                let Ok(response) = client
                    .get(format!("http://{addr}/errors/latest?since=1m"))
                    .send()
                    .await
                else {
                    return false;
                };
                response
                    .json::<Value>()
                    .await
                    .map(|payload| payload["error_count"] == 1)
                    .unwrap_or(false)
            }
        })
        .await,
        "expected caller pattern match to surface in recent errors"
    );

    let stopped = client
        .delete(format!("http://{addr}/processes/{pid}"))
        .send()
        .await
        .expect("send stop request");
    assert_eq!(stopped.status(), reqwest::StatusCode::OK);
    assert_eq!(supervisor.process_count(), 0);

    let monitored = client
        .get(format!("http://{addr}/processes/monitored"))
        .send()
        .await
        .expect("send list request")
        .json::<Value>()
        .await
        .expect("parse list payload");
    assert_eq!(monitored["count"], 0);

    server.abort();
}
