//! Argus gateway server bootstrap and router wiring.

use super::*;

/// Binds the listener, launches the supervisor and serves until ctrl-c or SIGTERM.
/// Every supervised process is stopped before this returns.
pub async fn run_argus_gateway_server(config: ArgusGatewayConfig) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    if !config.workspace.is_dir() {
        anyhow::bail!(
            "workspace '{}' is not a directory",
            config.workspace.display()
        );
    }

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind argus gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound argus gateway address")?;

    let supervisor = ProcessSupervisor::launch(config.supervisor.clone())
        .context("failed to launch process supervisor")?;
    info!(
        addr = %local_addr,
        workspace = %config.workspace.display(),
        max_processes = config.supervisor.max_processes,
        "argus gateway listening"
    );

    let state = Arc::new(ArgusGatewayState::new(config, supervisor.clone()));
    let app = build_argus_gateway_router(state);
    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    info!("argus gateway shutting down, stopping supervised processes");
    supervisor.stop_all().await;
    serve_result.context("argus gateway server exited unexpectedly")?;
    Ok(())
}

pub fn build_argus_gateway_router(state: Arc<ArgusGatewayState>) -> Router {
    Router::new()
        .route(ROOT_ENDPOINT, get(handle_root_status))
        .route(PROCESSES_MONITORED_ENDPOINT, get(handle_processes_monitored))
        .route(PROCESSES_METRICS_ENDPOINT, get(handle_process_metrics))
        .route(PROCESSES_START_ENDPOINT, post(handle_process_start))
        .route(PROCESS_DETAIL_ENDPOINT, delete(handle_process_stop))
        .route(PROCESS_OUTPUT_ENDPOINT, get(handle_process_output))
        .route(ERRORS_LATEST_ENDPOINT, get(handle_recent_errors))
        .route(ERRORS_STREAM_ENDPOINT, get(handle_recent_errors))
        .route(DEV_START_ENDPOINT, post(handle_dev_server_start))
        .route(DEV_STOP_ENDPOINT, post(handle_dev_server_stop))
        .route(DEV_STATUS_ENDPOINT, get(handle_dev_server_status))
        .route(WS_ERRORS_ENDPOINT, get(handle_ws_errors_upgrade))
        .route(WS_PROCESSES_ENDPOINT, get(handle_ws_processes_upgrade))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
