//! WebSocket streaming endpoints backed by the supervisor's broadcast hub.
use argus_supervisor::{ConnectionError, StreamConnection};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use super::*;

/// Write half of an upgraded socket. The hub and the connection loop share it,
/// so every frame goes through one async mutex and per-client order holds.
pub(super) struct WebSocketStreamConnection {
    sender: tokio::sync::Mutex<SplitSink<WebSocket, WsMessage>>,
}

impl WebSocketStreamConnection {
    fn new(sender: SplitSink<WebSocket, WsMessage>) -> Self {
        Self {
            sender: tokio::sync::Mutex::new(sender),
        }
    }

    /// Lock wait and write share one deadline so a peer that stopped reading
    /// cannot pin the sink for other writers.
    async fn send_frame(&self, frame: WsMessage) -> Result<(), ConnectionError> {
        let timeout = ws_send_timeout();
        let write = async {
            self.sender
                .lock()
                .await
                .send(frame)
                .await
                .map_err(|error| ConnectionError::Write(error.to_string()))
        };
        tokio::time::timeout(timeout, write)
            .await
            .unwrap_or(Err(ConnectionError::TimedOut(timeout)))
    }
}

#[async_trait]
impl StreamConnection for WebSocketStreamConnection {
    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError> {
        self.send_frame(WsMessage::Text(payload.to_string().into()))
            .await
    }

    async fn close(&self) {
        let close = async {
            let mut sender = self.sender.lock().await;
            let _ = sender.send(WsMessage::Close(None)).await;
            let _ = sender.close().await;
        };
        if tokio::time::timeout(ws_send_timeout(), close).await.is_err() {
            debug!("websocket close timed out");
        }
    }
}

fn ws_send_timeout() -> Duration {
    Duration::from_secs(WS_SEND_TIMEOUT_SECONDS.max(1))
}

pub(super) async fn handle_ws_errors_upgrade(
    State(state): State<Arc<ArgusGatewayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_stream_connection(state, socket, StreamSubscription::Errors))
        .into_response()
}

pub(super) async fn handle_ws_processes_upgrade(
    State(state): State<Arc<ArgusGatewayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        run_stream_connection(state, socket, StreamSubscription::ErrorsAndStatus)
    })
    .into_response()
}

fn greeting_frame(state: &ArgusGatewayState, subscription: StreamSubscription) -> WsMessage {
    let now = current_unix_timestamp_ms();
    let greeting = match subscription {
        StreamSubscription::Errors => json!({
            "type": "connection",
            "message": "connected to argus error stream",
            "timestamp_unix_ms": now,
        }),
        StreamSubscription::ErrorsAndStatus => {
            let processes: Vec<MonitoredProcess> = state.supervisor.list();
            json!({
                "type": "process_status",
                "processes": processes,
                "timestamp_unix_ms": now,
            })
        }
    };
    WsMessage::Text(greeting.to_string().into())
}

async fn run_stream_connection(
    state: Arc<ArgusGatewayState>,
    socket: WebSocket,
    subscription: StreamSubscription,
) {
    let (sender, mut receiver) = socket.split();
    let connection = Arc::new(WebSocketStreamConnection::new(sender));

    // Greet before registering so the first frame a client sees is always the greeting.
    if let Err(error) = connection
        .send_frame(greeting_frame(&state, subscription))
        .await
    {
        warn!(%error, "failed to send websocket greeting");
        return;
    }
    let hub = state.supervisor.hub();
    let connection_id = hub.add(connection.clone(), subscription);
    info!(connection_id, ?subscription, "stream client connected");

    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_INTERVAL_SECONDS.max(1)));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(Ok(message)) = inbound else {
                    break;
                };
                match message {
                    WsMessage::Ping(payload) => {
                        if connection.send_frame(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    WsMessage::Text(_) | WsMessage::Binary(_) | WsMessage::Pong(_) => {}
                }
            }
            _ = heartbeat.tick() => {
                if connection.send_frame(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // The hub may already have dropped a connection whose write failed.
    hub.remove(connection_id);
    connection.close().await;
    info!(connection_id, "stream client disconnected");
}
