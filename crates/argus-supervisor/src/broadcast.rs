//! Fan-out of classified errors and status snapshots to streaming connections.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use argus_core::{current_unix_timestamp_ms, read_or_recover, write_or_recover};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{MonitoredProcess, StreamError};

pub type ConnectionId = u64;

/// Upper bound on one write to one connection before the hub drops it.
pub const DEFAULT_CONNECTION_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("failed to write to connection: {0}")]
    Write(String),
    #[error("connection write timed out after {0:?}")]
    TimedOut(Duration),
}

/// A streaming client registered with the [`BroadcastHub`]. Implementations
/// serialize their own writes so per-connection message order is preserved.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError>;
    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSubscription {
    Errors,
    ErrorsAndStatus,
}

impl StreamSubscription {
    fn receives_status(self) -> bool {
        matches!(self, Self::ErrorsAndStatus)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HubMessage<'a> {
    Error {
        error: &'a StreamError,
    },
    ProcessUpdate {
        processes: &'a [MonitoredProcess],
        timestamp_unix_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

struct RegisteredConnection {
    connection: Arc<dyn StreamConnection>,
    subscription: StreamSubscription,
}

pub struct BroadcastHub {
    connections: RwLock<BTreeMap<ConnectionId, RegisteredConnection>>,
    next_connection_id: AtomicU64,
    write_timeout: Duration,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::with_write_timeout(DEFAULT_CONNECTION_WRITE_TIMEOUT)
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("connections", &self.len())
            .finish()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            next_connection_id: AtomicU64::new(0),
            write_timeout,
        }
    }

    pub fn add(
        &self,
        connection: Arc<dyn StreamConnection>,
        subscription: StreamSubscription,
    ) -> ConnectionId {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        write_or_recover(&self.connections).insert(
            id,
            RegisteredConnection {
                connection,
                subscription,
            },
        );
        debug!(connection_id = id, "stream connection registered");
        id
    }

    /// Deregisters a connection without closing it. Returns false for unknown ids.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = write_or_recover(&self.connections).remove(&id).is_some();
        if removed {
            debug!(connection_id = id, "stream connection removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        read_or_recover(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_subscriber_count(&self) -> usize {
        read_or_recover(&self.connections)
            .values()
            .filter(|registered| registered.subscription.receives_status())
            .count()
    }

    pub async fn broadcast_error(&self, error: &StreamError) -> BroadcastReport {
        match serde_json::to_string(&HubMessage::Error { error }) {
            Ok(payload) => self.broadcast_payload(&payload, |_| true).await,
            Err(error) => {
                warn!(%error, "failed to serialize stream error for broadcast");
                BroadcastReport::default()
            }
        }
    }

    pub async fn broadcast_status(&self, processes: &[MonitoredProcess]) -> BroadcastReport {
        let message = HubMessage::ProcessUpdate {
            processes,
            timestamp_unix_ms: current_unix_timestamp_ms(),
        };
        match serde_json::to_string(&message) {
            Ok(payload) => {
                self.broadcast_payload(&payload, StreamSubscription::receives_status)
                    .await
            }
            Err(error) => {
                warn!(%error, "failed to serialize process update for broadcast");
                BroadcastReport::default()
            }
        }
    }

    /// Writes to a snapshot of matching connections; failures and writes that miss
    /// the deadline are removed and closed after the iteration so the lock is never
    /// held across a write and a stalled client cannot hold up the others.
    async fn broadcast_payload(
        &self,
        payload: &str,
        include: fn(StreamSubscription) -> bool,
    ) -> BroadcastReport {
        let targets = read_or_recover(&self.connections)
            .iter()
            .filter(|(_, registered)| include(registered.subscription))
            .map(|(id, registered)| (*id, Arc::clone(&registered.connection)))
            .collect::<Vec<_>>();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, connection) in targets {
            let outcome =
                match tokio::time::timeout(self.write_timeout, connection.send_text(payload)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ConnectionError::TimedOut(self.write_timeout)),
                };
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    debug!(connection_id = id, %error, "dropping stream connection after write failure");
                    failed.push((id, connection));
                }
            }
        }

        for (id, connection) in failed {
            if self.remove(id) {
                report.dropped += 1;
            }
            if tokio::time::timeout(self.write_timeout, connection.close())
                .await
                .is_err()
            {
                debug!(connection_id = id, "stream connection close timed out");
            }
        }
        report
    }
}
