//! Observable worker statistics (spec §4.4 "Observable stats").

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::{Config, WorkerMode};
use crate::db::jobs::QueueStatus;

/// Running counters incremented by the main loop. Cheap to share across
/// tasks: each field is an independent atomic, so no lock is needed to
/// bump one counter while another thread reads a snapshot.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    stuck_detected: AtomicU64,
}

impl WorkerStats {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stuck_detected(&self) {
        self.stuck_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            stuck_detected: self.stuck_detected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub stuck_detected: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThrottlingStatus {
    pub min_time_between_jobs_secs: u64,
    pub additional_sleep_time_secs: u64,
}

/// Full observable snapshot: `{worker_running, mode, throttling,
/// worker_stats, queue_status}` per spec §4.4.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_running: bool,
    pub mode: String,
    pub throttling: ThrottlingStatus,
    pub worker_stats: WorkerStatsSnapshot,
    pub queue_status: QueueStatus,
}

impl WorkerStatus {
    pub fn new(
        worker_running: bool,
        mode: WorkerMode,
        config: &Config,
        worker_stats: WorkerStatsSnapshot,
        queue_status: QueueStatus,
    ) -> Self {
        let mode = match mode.resolved() {
            WorkerMode::Thread => "thread",
            WorkerMode::Daemon => "daemon",
            WorkerMode::Auto => "auto",
        };

        Self {
            worker_running,
            mode: mode.to_string(),
            throttling: ThrottlingStatus {
                min_time_between_jobs_secs: config.min_time_between_jobs.as_secs(),
                additional_sleep_time_secs: config.additional_sleep_time.as_secs(),
            },
            worker_stats,
            queue_status,
        }
    }
}
