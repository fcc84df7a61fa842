//! Top-level process supervisor: start, stop, output access, restart and cleanup.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use argus_core::{current_unix_timestamp_ms, is_within_window_ms, lock_or_recover};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::config::SupervisorConfig;
use crate::dispatcher::{ErrorDispatcher, ErrorSink};
use crate::error::SupervisorError;
use crate::metrics::{MetricsSnapshot, ProcessMetrics};
use crate::output_reader::run_output_reader;
use crate::registry::{NewProcessEntry, ProcessEntry, ProcessRegistry, TerminationRequest};
use crate::termination::{is_process_alive, send_graceful_termination};
use crate::types::{
    MonitoredProcess, OutputLog, OutputStream, ProcessCommand, ProcessExit, StreamError,
};
use crate::validator::validate_process_command;

const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);
const PROCESS_TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct SupervisorInner {
    config: SupervisorConfig,
    registry: ProcessRegistry,
    metrics: Arc<ProcessMetrics>,
    hub: Arc<BroadcastHub>,
    dispatcher: Arc<ErrorDispatcher>,
    shutdown: CancellationToken,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the shared supervisor state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("processes", &self.inner.registry.len())
            .field("connections", &self.inner.hub.len())
            .field("shutting_down", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl ProcessSupervisor {
    /// Creates a supervisor without background tasks. Classified errors queue in
    /// the dispatcher until [`ProcessSupervisor::spawn_background_tasks`] runs.
    pub fn new(config: SupervisorConfig) -> Self {
        let metrics = Arc::new(ProcessMetrics::default());
        let dispatcher = Arc::new(ErrorDispatcher::new(
            config.error_stream_buffer,
            Arc::clone(&metrics),
        ));
        Self {
            inner: Arc::new(SupervisorInner {
                registry: ProcessRegistry::new(config.max_processes),
                config,
                metrics,
                hub: Arc::new(BroadcastHub::new()),
                dispatcher,
                shutdown: CancellationToken::new(),
                background_tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a supervisor and starts its dispatcher workers, cleanup loop and
    /// status broadcaster on the current tokio runtime.
    pub fn launch(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let supervisor = Self::new(config);
        supervisor.spawn_background_tasks()?;
        Ok(supervisor)
    }

    pub fn spawn_background_tasks(&self) -> Result<(), SupervisorError> {
        let runtime = Handle::try_current().map_err(|_| SupervisorError::RuntimeUnavailable)?;
        let config = &self.inner.config;
        let sink: Arc<dyn ErrorSink> = Arc::clone(&self.inner) as Arc<dyn ErrorSink>;
        let _guard = runtime.enter();
        let Some(mut handles) = self.inner.dispatcher.start(
            sink,
            config.worker_count,
            self.inner.shutdown.clone(),
        ) else {
            debug!("supervisor background tasks already running");
            return Ok(());
        };
        handles.push(runtime.spawn(run_cleanup_loop(
            self.clone(),
            config.cleanup_interval,
            self.inner.shutdown.clone(),
        )));
        handles.push(runtime.spawn(run_status_broadcast_loop(
            self.clone(),
            config.status_broadcast_interval,
            self.inner.shutdown.clone(),
        )));
        lock_or_recover(&self.inner.background_tasks).extend(handles);
        info!(
            worker_count = config.worker_count,
            max_processes = config.max_processes,
            "process supervisor started"
        );
        Ok(())
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.inner.hub)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Validates, spawns and registers a monitored process, returning its initial
    /// snapshot. Must be called from within a tokio runtime.
    pub fn start(&self, command: ProcessCommand) -> Result<MonitoredProcess, SupervisorError> {
        self.start_with_attempt(command, 0)
    }

    fn start_with_attempt(
        &self,
        command: ProcessCommand,
        restart_attempt: u32,
    ) -> Result<MonitoredProcess, SupervisorError> {
        let started = Instant::now();
        let inner = &self.inner;
        inner.metrics.record_start_attempt();
        info!(
            command = %command.display_line(),
            working_dir = %command.working_dir.display(),
            restart_attempt,
            "starting monitored process"
        );

        if inner.shutdown.is_cancelled() {
            inner.metrics.record_start_failure();
            return Err(SupervisorError::ShuttingDown);
        }
        let runtime = Handle::try_current().map_err(|_| {
            inner.metrics.record_start_failure();
            SupervisorError::RuntimeUnavailable
        })?;
        let validated = validate_process_command(&command, &inner.config.allowed_commands)
            .map_err(|error| {
                inner.metrics.record_start_failure();
                warn!(command = %command.command, %error, "rejected process command");
                SupervisorError::from(error)
            })?;
        let reservation = inner.registry.reserve().inspect_err(|error| {
            inner.metrics.record_start_failure();
            warn!(command = %command.command, %error, "process limit reached");
        })?;

        let _guard = runtime.enter();
        let mut child_command = Command::new(&validated.executable);
        child_command
            .args(&command.args)
            .current_dir(&validated.working_dir)
            .envs(&command.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = child_command.spawn().map_err(|source| {
            inner.metrics.record_start_failure();
            warn!(command = %command.command, error = %source, "failed to spawn process");
            SupervisorError::SpawnFailed {
                command: command.command.clone(),
                source,
            }
        })?;

        let (Some(pid), Some(stdout), Some(stderr)) =
            (child.id(), child.stdout.take(), child.stderr.take())
        else {
            inner.metrics.record_start_failure();
            let _ = child.start_kill();
            return Err(SupervisorError::SpawnFailed {
                command: command.command.clone(),
                source: std::io::Error::other("spawned process is missing its pid or pipes"),
            });
        };

        let (termination_tx, termination_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let entry = Arc::new(ProcessEntry::new(NewProcessEntry {
            pid,
            command,
            working_dir: validated.working_dir,
            patterns: validated.patterns,
            restart_attempt,
            max_output_lines: inner.config.max_output_lines,
            stop_token: inner.shutdown.child_token(),
            termination_tx,
            exit_rx,
        }));
        if let Some(displaced) = reservation.insert(Arc::clone(&entry)) {
            debug!(pid, "displacing stale registry entry for reused pid");
            displaced.release_streams();
        }
        inner.metrics.record_process_started();

        let handles = vec![
            runtime.spawn(run_output_reader(
                stdout,
                OutputStream::Stdout,
                Arc::clone(&entry),
                Arc::clone(&inner.dispatcher),
            )),
            runtime.spawn(run_output_reader(
                stderr,
                OutputStream::Stderr,
                Arc::clone(&entry),
                Arc::clone(&inner.dispatcher),
            )),
            runtime.spawn(watch_process_completion(
                self.clone(),
                Arc::clone(&entry),
                child,
                termination_rx,
                exit_tx,
            )),
        ];
        entry.track_tasks(handles);

        info!(
            pid,
            command = %entry.command().command,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "monitored process started"
        );
        Ok(entry.snapshot())
    }

    /// Terminates a process (SIGTERM, bounded wait, then kill) and removes it from
    /// the registry. The entry is removed even when termination fails.
    pub async fn stop(&self, pid: u32) -> Result<(), SupervisorError> {
        let entry = self
            .inner
            .registry
            .get(pid)
            .ok_or(SupervisorError::ProcessNotFound { pid })?;
        info!(pid, command = %entry.command().command, "stopping monitored process");
        entry.request_stop();

        let outcome = self.terminate(&entry).await;
        self.inner.registry.remove_entry(&entry);
        entry.release_streams();
        entry.join_tasks(PROCESS_TASK_JOIN_TIMEOUT).await;

        match &outcome {
            Ok(()) => info!(pid, "monitored process stopped"),
            Err(error) => warn!(pid, %error, "monitored process removed after failed termination"),
        }
        outcome
    }

    async fn terminate(&self, entry: &ProcessEntry) -> Result<(), SupervisorError> {
        let pid = entry.pid();
        if entry.has_exited() {
            return Ok(());
        }

        match entry.request_graceful_termination().await {
            None => return Ok(()),
            Some(Ok(())) => {
                if entry.wait_for_exit(self.inner.config.stop_timeout).await.is_some() {
                    return Ok(());
                }
                warn!(
                    pid,
                    timeout_ms = self.inner.config.stop_timeout.as_millis() as u64,
                    "process ignored SIGTERM; force killing"
                );
            }
            Some(Err(error)) => {
                debug!(pid, %error, "graceful termination unavailable; force killing");
            }
        }

        if !entry.request_kill() {
            return Ok(());
        }
        match entry.wait_for_exit(FORCE_KILL_WAIT).await {
            Some(_) => Ok(()),
            None => Err(SupervisorError::TerminationFailed {
                pid,
                reason: format!(
                    "process still running {}ms after kill",
                    FORCE_KILL_WAIT.as_millis()
                ),
            }),
        }
    }

    /// Refuses new starts, stops every registered process, then awaits the
    /// background tasks. Entries are removed even when their termination fails.
    pub async fn stop_all(&self) {
        self.inner.shutdown.cancel();
        loop {
            let pids = self.inner.registry.pids();
            if pids.is_empty() {
                break;
            }
            info!(count = pids.len(), "stopping all monitored processes");
            for pid in pids {
                match self.stop(pid).await {
                    Ok(()) | Err(SupervisorError::ProcessNotFound { .. }) => {}
                    Err(error) => warn!(pid, %error, "failed to stop process during shutdown"),
                }
            }
        }

        let handles = std::mem::take(&mut *lock_or_recover(&self.inner.background_tasks));
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "supervisor background task ended abnormally");
            }
        }
        info!("process supervisor shut down");
    }

    /// Most recent `max_lines` lines of the selected log; `0` returns everything.
    pub fn get_output(
        &self,
        pid: u32,
        max_lines: usize,
        log: OutputLog,
    ) -> Result<Vec<String>, SupervisorError> {
        self.inner
            .registry
            .get(pid)
            .map(|entry| entry.output_tail(log, max_lines))
            .ok_or(SupervisorError::ProcessNotFound { pid })
    }

    pub fn get_process(&self, pid: u32) -> Result<MonitoredProcess, SupervisorError> {
        self.inner
            .registry
            .get(pid)
            .map(|entry| entry.snapshot())
            .ok_or(SupervisorError::ProcessNotFound { pid })
    }

    /// Snapshots of every registered process ordered by start time, then pid.
    pub fn list(&self) -> Vec<MonitoredProcess> {
        let mut processes = self
            .inner
            .registry
            .entries()
            .iter()
            .map(|entry| entry.snapshot())
            .collect::<Vec<_>>();
        processes.sort_by_key(|process| (process.start_time_unix_ms, process.pid));
        processes
    }

    pub fn process_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Last error of each process when it was recorded within `since` of now.
    pub fn latest_errors(&self, since: Duration) -> Vec<StreamError> {
        let now = current_unix_timestamp_ms();
        let window_ms = u64::try_from(since.as_millis()).unwrap_or(u64::MAX);
        let mut errors = self
            .inner
            .registry
            .entries()
            .iter()
            .filter_map(|entry| entry.last_error())
            .filter(|error| is_within_window_ms(error.timestamp_unix_ms, now, window_ms))
            .collect::<Vec<_>>();
        errors.sort_by_key(|error| (error.timestamp_unix_ms, error.process_pid));
        errors
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Waits up to `timeout` for `pid` to exit. `Ok(None)` means it is still running.
    pub async fn wait_for_exit(
        &self,
        pid: u32,
        timeout: Duration,
    ) -> Result<Option<ProcessExit>, SupervisorError> {
        let entry = self
            .inner
            .registry
            .get(pid)
            .ok_or(SupervisorError::ProcessNotFound { pid })?;
        Ok(entry.wait_for_exit(timeout).await)
    }

    /// Removes entries whose OS process is gone or which already reached a terminal
    /// status. Returns the number of removed entries.
    pub fn cleanup_exited_processes(&self) -> usize {
        let mut removed = 0;
        for entry in self.inner.registry.entries() {
            let pid = entry.pid();
            let status = entry.status();
            if !status.is_terminal() && is_process_alive(pid) {
                continue;
            }
            if self.inner.registry.remove_entry(&entry) {
                entry.release_streams();
                removed += 1;
                info!(pid, status = status.as_str(), "cleaned up exited process");
            }
        }
        removed
    }

    fn schedule_restart(&self, entry: Arc<ProcessEntry>, exit: ProcessExit) -> Option<JoinHandle<()>> {
        let policy = &self.inner.config.restart;
        let attempt = entry.restart_attempt();
        if attempt >= policy.max_attempts {
            warn!(
                pid = entry.pid(),
                attempts = attempt,
                "auto-restart budget exhausted; leaving process stopped"
            );
            return None;
        }
        let delay = policy.backoff_for_attempt(attempt);
        info!(
            pid = entry.pid(),
            exit_code = ?exit.code,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling auto-restart"
        );

        let supervisor = self.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = entry.stop_token().cancelled() => {
                    debug!(pid = entry.pid(), "auto-restart cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            match supervisor.start_with_attempt(entry.command().clone(), attempt + 1) {
                Ok(process) => {
                    supervisor.inner.metrics.record_restart();
                    info!(
                        previous_pid = entry.pid(),
                        pid = process.pid,
                        attempt = attempt + 1,
                        "monitored process restarted"
                    );
                }
                Err(error) => {
                    warn!(previous_pid = entry.pid(), %error, "auto-restart failed");
                }
            }
        }))
    }
}

#[async_trait]
impl ErrorSink for SupervisorInner {
    async fn handle_stream_error(&self, error: StreamError) {
        self.metrics.record_error();
        if let Some(entry) = self.registry.get(error.process_pid) {
            entry.record_error(&error);
        }
        debug!(
            pid = error.process_pid,
            error_type = error.error_type.as_str(),
            message = %error.message,
            "classified process error"
        );
        self.hub.broadcast_error(&error).await;
    }
}

async fn watch_process_completion(
    supervisor: ProcessSupervisor,
    entry: Arc<ProcessEntry>,
    mut child: Child,
    mut termination_rx: mpsc::UnboundedReceiver<TerminationRequest>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let pid = entry.pid();
    let wait_result = loop {
        tokio::select! {
            result = child.wait() => break result,
            Some(request) = termination_rx.recv() => match request {
                TerminationRequest::Graceful(reply) => {
                    // `id()` is `None` once the child has been reaped.
                    let outcome = match child.id() {
                        Some(child_pid) => send_graceful_termination(child_pid),
                        None => Ok(()),
                    };
                    let _ = reply.send(outcome);
                }
                TerminationRequest::Kill => {
                    if let Err(error) = child.start_kill() {
                        warn!(pid, %error, "failed to send kill to process");
                    }
                }
            },
        }
    };
    drop(termination_rx);
    let exit = match wait_result {
        Ok(status) => ProcessExit::from_status(status),
        Err(error) => {
            warn!(pid, %error, "failed waiting for process exit");
            ProcessExit::unknown()
        }
    };

    if entry.mark_exited(&exit) {
        supervisor.inner.metrics.record_process_exited();
    }
    info!(
        pid,
        exit_code = ?exit.code,
        signal = ?exit.signal,
        status = exit.terminal_status().as_str(),
        "monitored process exited"
    );
    let _ = exit_tx.send(Some(exit));

    if entry.command().auto_restart && !exit.success && !entry.is_stop_requested() {
        if let Some(handle) = supervisor.schedule_restart(Arc::clone(&entry), exit) {
            entry.track_tasks(vec![handle]);
        }
    }
}

async fn run_cleanup_loop(
    supervisor: ProcessSupervisor,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = supervisor.cleanup_exited_processes();
                if removed > 0 {
                    debug!(removed, "process cleanup sweep finished");
                }
            }
        }
    }
    debug!("process cleanup loop exited");
}

async fn run_status_broadcast_loop(
    supervisor: ProcessSupervisor,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let hub = supervisor.hub();
                if hub.status_subscriber_count() > 0 {
                    hub.broadcast_status(&supervisor.list()).await;
                }
            }
        }
    }
    debug!("status broadcast loop exited");
}
