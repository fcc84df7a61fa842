use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free supervisor counters.
#[derive(Debug, Default)]
pub struct ProcessMetrics {
    start_attempts: AtomicU64,
    start_failures: AtomicU64,
    active_processes: AtomicU64,
    total_errors: AtomicU64,
    dropped_errors: AtomicU64,
    restarts_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub start_attempts: u64,
    pub start_failures: u64,
    pub active_processes: u64,
    pub total_errors: u64,
    pub dropped_errors: u64,
    pub restarts_total: u64,
}

impl ProcessMetrics {
    pub fn record_start_attempt(&self) {
        self.start_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start_failure(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_started(&self) {
        self.active_processes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_exited(&self) {
        let _ = self
            .active_processes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| {
                Some(active.saturating_sub(1))
            });
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_error(&self) {
        self.dropped_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            start_attempts: self.start_attempts.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            active_processes: self.active_processes.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            dropped_errors: self.dropped_errors.load(Ordering::Relaxed),
            restarts_total: self.restarts_total.load(Ordering::Relaxed),
        }
    }
}
