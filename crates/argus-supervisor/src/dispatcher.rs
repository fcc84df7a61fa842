//! Bounded hand-off of classified errors from output readers to a worker pool.
//!
//! Readers submit without blocking into the input channel. A forwarder moves errors
//! into the worker queue; when that queue is full it parks them in a bounded
//! pending batch (oldest evicted first) that a flush ticker re-offers in order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus_core::lock_or_recover;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::ProcessMetrics;
use crate::types::StreamError;

pub const PENDING_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Consumer invoked by dispatcher workers for every accepted error.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn handle_stream_error(&self, error: StreamError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Dropped,
    Closed,
}

pub struct ErrorDispatcher {
    input_tx: mpsc::Sender<StreamError>,
    input_rx: Mutex<Option<mpsc::Receiver<StreamError>>>,
    buffer_capacity: usize,
    metrics: Arc<ProcessMetrics>,
}

impl std::fmt::Debug for ErrorDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorDispatcher")
            .field("buffer_capacity", &self.buffer_capacity)
            .field("queued", &self.queued_len())
            .finish()
    }
}

impl ErrorDispatcher {
    pub fn new(buffer_capacity: usize, metrics: Arc<ProcessMetrics>) -> Self {
        let buffer_capacity = buffer_capacity.max(1);
        let (input_tx, input_rx) = mpsc::channel(buffer_capacity);
        Self {
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            buffer_capacity,
            metrics,
        }
    }

    /// Errors waiting in the input channel.
    pub fn queued_len(&self) -> usize {
        self.buffer_capacity
            .saturating_sub(self.input_tx.capacity())
    }

    /// Non-blocking submit. A full input channel drops the error, logs it and counts
    /// it in `dropped_errors`.
    pub fn submit(&self, error: StreamError) -> SubmitOutcome {
        match self.input_tx.try_send(error) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(error)) => {
                self.metrics.record_dropped_error();
                warn!(
                    pid = error.process_pid,
                    command = %error.command,
                    "error stream full; dropping classified error"
                );
                SubmitOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(error)) => {
                debug!(
                    pid = error.process_pid,
                    "error stream closed; discarding classified error"
                );
                SubmitOutcome::Closed
            }
        }
    }

    /// Spawns the forwarder and `worker_count` workers. Returns `None` when already started.
    pub fn start(
        &self,
        sink: Arc<dyn ErrorSink>,
        worker_count: usize,
        cancel: CancellationToken,
    ) -> Option<Vec<JoinHandle<()>>> {
        let input_rx = lock_or_recover(&self.input_rx).take()?;
        let (worker_tx, worker_rx) = async_channel::bounded(self.buffer_capacity);

        let mut handles = Vec::with_capacity(worker_count.max(1) + 1);
        handles.push(tokio::spawn(run_forwarder(
            input_rx,
            worker_tx,
            self.buffer_capacity,
            Arc::clone(&self.metrics),
            cancel.clone(),
        )));
        for worker_index in 0..worker_count.max(1) {
            handles.push(tokio::spawn(run_worker(
                worker_index,
                worker_rx.clone(),
                Arc::clone(&sink),
                cancel.clone(),
            )));
        }
        Some(handles)
    }
}

async fn run_forwarder(
    mut input_rx: mpsc::Receiver<StreamError>,
    worker_tx: async_channel::Sender<StreamError>,
    pending_capacity: usize,
    metrics: Arc<ProcessMetrics>,
    cancel: CancellationToken,
) {
    let mut pending = VecDeque::new();
    let mut flush_ticker = tokio::time::interval(PENDING_FLUSH_INTERVAL);
    flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = input_rx.recv() => {
                let Some(error) = received else {
                    break;
                };
                if pending.is_empty() {
                    match worker_tx.try_send(error) {
                        Ok(()) => {}
                        Err(async_channel::TrySendError::Full(error)) => {
                            park_pending(&mut pending, error, pending_capacity, &metrics);
                        }
                        Err(async_channel::TrySendError::Closed(_)) => break,
                    }
                } else {
                    park_pending(&mut pending, error, pending_capacity, &metrics);
                }
            }
            _ = flush_ticker.tick() => {
                if !flush_pending(&mut pending, &worker_tx) {
                    break;
                }
            }
        }
    }
    if !pending.is_empty() {
        debug!(pending = pending.len(), "error forwarder exiting with undelivered batch");
    }
}

fn park_pending(
    pending: &mut VecDeque<StreamError>,
    error: StreamError,
    capacity: usize,
    metrics: &ProcessMetrics,
) {
    while pending.len() >= capacity {
        if let Some(evicted) = pending.pop_front() {
            metrics.record_dropped_error();
            warn!(
                pid = evicted.process_pid,
                "pending error batch full; dropping oldest classified error"
            );
        }
    }
    pending.push_back(error);
}

/// Re-offers parked errors in FIFO order. Returns false once the worker queue is closed.
fn flush_pending(
    pending: &mut VecDeque<StreamError>,
    worker_tx: &async_channel::Sender<StreamError>,
) -> bool {
    while let Some(error) = pending.pop_front() {
        match worker_tx.try_send(error) {
            Ok(()) => {}
            Err(async_channel::TrySendError::Full(error)) => {
                pending.push_front(error);
                return true;
            }
            Err(async_channel::TrySendError::Closed(_)) => return false,
        }
    }
    true
}

async fn run_worker(
    worker_index: usize,
    worker_rx: async_channel::Receiver<StreamError>,
    sink: Arc<dyn ErrorSink>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = worker_rx.recv() => match received {
                Ok(error) => sink.handle_stream_error(error).await,
                Err(_) => break,
            },
        }
    }
    debug!(worker_index, "error dispatcher worker exited");
}
