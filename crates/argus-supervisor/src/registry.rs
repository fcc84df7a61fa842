//! Concurrency-safe pid → process record map with capacity reservations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use argus_core::{current_unix_timestamp_ms, lock_or_recover, read_or_recover, write_or_recover};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bounded_log::BoundedLog;
use crate::classifier::CustomPatterns;
use crate::error::SupervisorError;
use crate::types::{
    MonitoredProcess, OutputLog, OutputStream, ProcessCommand, ProcessExit, ProcessStatus,
    StreamError,
};

#[derive(Debug)]
struct ProcessState {
    status: ProcessStatus,
    combined_lines: BoundedLog,
    stdout_lines: BoundedLog,
    stderr_lines: BoundedLog,
    error_lines: BoundedLog,
    last_error: Option<StreamError>,
    exit_code: Option<i32>,
}

/// Signals routed to the completion watcher, which still owns the `Child` and so
/// never signals a pid that has already been reaped.
#[derive(Debug)]
pub(crate) enum TerminationRequest {
    Graceful(oneshot::Sender<std::io::Result<()>>),
    Kill,
}

/// Everything needed to register a freshly spawned process.
pub(crate) struct NewProcessEntry {
    pub pid: u32,
    pub command: ProcessCommand,
    pub working_dir: PathBuf,
    pub patterns: CustomPatterns,
    pub restart_attempt: u32,
    pub max_output_lines: usize,
    pub stop_token: CancellationToken,
    pub termination_tx: mpsc::UnboundedSender<TerminationRequest>,
    pub exit_rx: watch::Receiver<Option<ProcessExit>>,
}

/// Canonical record of one monitored process.
///
/// Identity fields are immutable; status, logs and last error live behind the
/// entry's own mutex. `stop_token` is cancelled by stop or supervisor shutdown and
/// suppresses auto-restart; `reader_token` is its child and also covers cleanup.
#[derive(Debug)]
pub struct ProcessEntry {
    pid: u32,
    command: ProcessCommand,
    working_dir: PathBuf,
    patterns: CustomPatterns,
    start_time_unix_ms: u64,
    restart_attempt: u32,
    state: Mutex<ProcessState>,
    stop_token: CancellationToken,
    reader_token: CancellationToken,
    termination_tx: mpsc::UnboundedSender<TerminationRequest>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessEntry {
    pub(crate) fn new(new_entry: NewProcessEntry) -> Self {
        let reader_token = new_entry.stop_token.child_token();
        Self {
            pid: new_entry.pid,
            command: new_entry.command,
            working_dir: new_entry.working_dir,
            patterns: new_entry.patterns,
            start_time_unix_ms: current_unix_timestamp_ms(),
            restart_attempt: new_entry.restart_attempt,
            state: Mutex::new(ProcessState {
                status: ProcessStatus::Running,
                combined_lines: BoundedLog::new(new_entry.max_output_lines),
                stdout_lines: BoundedLog::new(new_entry.max_output_lines),
                stderr_lines: BoundedLog::new(new_entry.max_output_lines),
                error_lines: BoundedLog::new(new_entry.max_output_lines),
                last_error: None,
                exit_code: None,
            }),
            stop_token: new_entry.stop_token,
            reader_token,
            termination_tx: new_entry.termination_tx,
            exit_rx: new_entry.exit_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &ProcessCommand {
        &self.command
    }

    pub fn restart_attempt(&self) -> u32 {
        self.restart_attempt
    }

    pub fn start_time_unix_ms(&self) -> u64 {
        self.start_time_unix_ms
    }

    pub(crate) fn patterns(&self) -> &CustomPatterns {
        &self.patterns
    }

    pub fn status(&self) -> ProcessStatus {
        lock_or_recover(&self.state).status
    }

    pub fn last_error(&self) -> Option<StreamError> {
        lock_or_recover(&self.state).last_error.clone()
    }

    pub(crate) fn append_output(&self, stream: OutputStream, line: String) {
        let mut state = lock_or_recover(&self.state);
        state.combined_lines.push(line.clone());
        match stream {
            OutputStream::Stdout => state.stdout_lines.push(line),
            OutputStream::Stderr => state.stderr_lines.push(line),
        }
    }

    pub(crate) fn record_error(&self, error: &StreamError) {
        let mut state = lock_or_recover(&self.state);
        state.error_lines.push(error.message.clone());
        state.last_error = Some(error.clone());
    }

    /// Applies the `running → stopped | error` transition. Returns false when the
    /// entry had already reached a terminal status.
    pub(crate) fn mark_exited(&self, exit: &ProcessExit) -> bool {
        let mut state = lock_or_recover(&self.state);
        if state.status.is_terminal() {
            return false;
        }
        state.status = exit.terminal_status();
        state.exit_code = exit.code;
        true
    }

    pub fn output_tail(&self, log: OutputLog, max_lines: usize) -> Vec<String> {
        let state = lock_or_recover(&self.state);
        match log {
            OutputLog::Combined => state.combined_lines.tail(max_lines),
            OutputLog::Stdout => state.stdout_lines.tail(max_lines),
            OutputLog::Stderr => state.stderr_lines.tail(max_lines),
            OutputLog::Errors => state.error_lines.tail(max_lines),
        }
    }

    pub fn snapshot(&self) -> MonitoredProcess {
        let state = lock_or_recover(&self.state);
        MonitoredProcess {
            pid: self.pid,
            command: self.command.command.clone(),
            args: self.command.args.clone(),
            working_dir: self.working_dir.clone(),
            start_time_unix_ms: self.start_time_unix_ms,
            status: state.status,
            stdout_lines: state.stdout_lines.to_vec(),
            stderr_lines: state.stderr_lines.to_vec(),
            error_lines: state.error_lines.to_vec(),
            last_error: state.last_error.clone(),
            exit_code: state.exit_code,
            auto_restart: self.command.auto_restart,
            restart_attempt: self.restart_attempt,
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Waits up to `timeout` for the completion watcher to publish the exit.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ProcessExit> {
        let mut exit_rx = self.exit_rx.clone();
        let exit = match tokio::time::timeout(timeout, exit_rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            Ok(Err(_)) => *self.exit_rx.borrow(),
            Err(_) => None,
        };
        exit
    }

    pub(crate) fn request_stop(&self) {
        self.stop_token.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop_token
    }

    pub(crate) fn reader_token(&self) -> &CancellationToken {
        &self.reader_token
    }

    /// Asks the completion watcher to send SIGTERM. `None` means the watcher has
    /// finished, so the child is already reaped.
    pub(crate) async fn request_graceful_termination(&self) -> Option<std::io::Result<()>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.termination_tx
            .send(TerminationRequest::Graceful(reply_tx))
            .ok()?;
        reply_rx.await.ok()
    }

    /// Asks the completion watcher to force-kill the child. Returns false when the
    /// watcher has finished.
    pub(crate) fn request_kill(&self) -> bool {
        self.termination_tx.send(TerminationRequest::Kill).is_ok()
    }

    /// Cancels the output readers, which drops both pipe handles.
    pub(crate) fn release_streams(&self) {
        self.reader_token.cancel();
    }

    pub(crate) fn track_tasks(&self, handles: Vec<JoinHandle<()>>) {
        lock_or_recover(&self.tasks).extend(handles);
    }

    /// Awaits owned tasks within `timeout`; stragglers are aborted.
    pub(crate) async fn join_tasks(&self, timeout: Duration) {
        let handles = std::mem::take(&mut *lock_or_recover(&self.tasks));
        let deadline = tokio::time::Instant::now() + timeout;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!(pid = self.pid, "process task did not finish in time; aborting");
                handle.abort();
            }
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<u32, Arc<ProcessEntry>>,
    reserved_slots: usize,
}

/// Registry of live process records, never holding more than `max_processes`
/// entries plus outstanding reservations.
#[derive(Debug)]
pub struct ProcessRegistry {
    state: RwLock<RegistryState>,
    max_processes: usize,
}

impl ProcessRegistry {
    pub fn new(max_processes: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            max_processes,
        }
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    /// Claims a slot under the write lock so check and insert are atomic across
    /// concurrent starts. Dropping the reservation without inserting frees the slot.
    pub fn reserve(&self) -> Result<SlotReservation<'_>, SupervisorError> {
        let mut state = write_or_recover(&self.state);
        if state.entries.len() + state.reserved_slots >= self.max_processes {
            return Err(SupervisorError::ProcessLimitReached {
                limit: self.max_processes,
            });
        }
        state.reserved_slots += 1;
        Ok(SlotReservation {
            registry: self,
            consumed: false,
        })
    }

    pub fn get(&self, pid: u32) -> Option<Arc<ProcessEntry>> {
        read_or_recover(&self.state).entries.get(&pid).cloned()
    }

    /// Removes `entry` only if it is still the record registered under its pid.
    pub fn remove_entry(&self, entry: &Arc<ProcessEntry>) -> bool {
        let mut state = write_or_recover(&self.state);
        match state.entries.get(&entry.pid()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                state.entries.remove(&entry.pid());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        read_or_recover(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids = read_or_recover(&self.state)
            .entries
            .keys()
            .copied()
            .collect::<Vec<_>>();
        pids.sort_unstable();
        pids
    }

    pub fn entries(&self) -> Vec<Arc<ProcessEntry>> {
        read_or_recover(&self.state)
            .entries
            .values()
            .cloned()
            .collect()
    }
}

#[must_use = "an unused reservation releases its slot on drop"]
pub struct SlotReservation<'a> {
    registry: &'a ProcessRegistry,
    consumed: bool,
}

impl SlotReservation<'_> {
    /// Converts the reservation into a registered entry. A stale record with the
    /// same pid (reused by the OS) is displaced and returned.
    pub fn insert(mut self, entry: Arc<ProcessEntry>) -> Option<Arc<ProcessEntry>> {
        let mut state = write_or_recover(&self.registry.state);
        state.reserved_slots = state.reserved_slots.saturating_sub(1);
        self.consumed = true;
        state.entries.insert(entry.pid(), entry)
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        let mut state = write_or_recover(&self.registry.state);
        state.reserved_slots = state.reserved_slots.saturating_sub(1);
    }
}

#[cfg(test)]
pub(crate) fn test_entry(pid: u32, max_output_lines: usize) -> Arc<ProcessEntry> {
    let (termination_tx, _termination_rx) = mpsc::unbounded_channel();
    let (_exit_tx, exit_rx) = watch::channel(None);
    Arc::new(ProcessEntry::new(NewProcessEntry {
        pid,
        command: ProcessCommand::new("sh"),
        working_dir: PathBuf::from("."),
        patterns: CustomPatterns::default(),
        restart_attempt: 0,
        max_output_lines,
        stop_token: CancellationToken::new(),
        termination_tx,
        exit_rx,
    }))
}
