//! Worker Runtime (spec §4.4): the poll loop that claims jobs, throttles,
//! sweeps for stuck jobs, dispatches to per-`job_type` handlers, and
//! classifies failures for retry. Grounded on the teacher's `Service`
//! idiom in `services/manager.rs` (named lifecycle methods, `tracing`
//! for every transition) without depending on that module's
//! `ServicesManager`/HTTP wiring, which this crate doesn't carry.

pub mod stats;
pub mod stuck;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sysinfo::System;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::jobs::{JobRecord, JobStatus};
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::queue::JobQueue;

pub use stats::{WorkerStats, WorkerStatsSnapshot, WorkerStatus};

/// A per-`job_type` handler. Receives the claimed job and returns the
/// fields the Worker should record on success. Errors must already be
/// classified into the core taxonomy — use cases are the boundary that
/// converts a collaborator's raw error into `CoreError` (spec §7
/// "Propagation policy"), so by the time an error reaches here it is
/// already `Transient`/`Permanent`/etc. A handler must not mutate queue
/// state itself (spec §4.4 "Registration" — the Worker owns transitions).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> CoreResult<HandlerOutcome>;
}

#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub media_file_id: Option<i64>,
    pub output_path: Option<String>,
}

/// In-memory bookkeeping for a job currently being handled. Lost on
/// crash by design — a crashed worker's rows are recovered by the next
/// sweep's stuck-job detection, not by reading this map back.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub pid: i64,
    pub started_at: DateTime<Utc>,
    pub job_dir: PathBuf,
    pub job_type: String,
}

/// The directory a job is expected to be writing into. Use-case
/// orchestrators record their chosen working directory (staging dir, or
/// the final destination directory) into `output_path` as soon as a job
/// enters `processing`, before the actual output file is known; this
/// gives stuck-job detection a stable path to inspect even after the
/// worker that wrote it has crashed. `output_path` is later overwritten
/// with the resolved output *file* once one exists.
pub fn job_working_dir(job: &JobRecord, config: &Config) -> PathBuf {
    match &job.output_path {
        Some(output_path) => {
            let path = Path::new(output_path);
            if path.extension().is_some() {
                path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf())
            } else {
                path.to_path_buf()
            }
        }
        None => config.staging_root().join(job.id.to_string()),
    }
}

pub struct WorkerRuntime {
    queue: JobQueue,
    db: Database,
    config: Config,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    stats: WorkerStats,
    pid: i64,
    stop: AtomicBool,
    running: AtomicBool,
    last_job_time: Mutex<Option<DateTime<Utc>>>,
    active_jobs: RwLock<HashMap<i64, ActiveJob>>,
}

impl WorkerRuntime {
    pub fn new(queue: JobQueue, db: Database, config: Config) -> Self {
        Self {
            queue,
            db,
            config,
            handlers: RwLock::new(HashMap::new()),
            stats: WorkerStats::default(),
            pid: std::process::id() as i64,
            stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
            last_job_time: Mutex::new(None),
            active_jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Install a handler for `job_type`. Replaces any existing handler
    /// for the same type.
    pub async fn register_processor(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.write().await.insert(job_type.into(), handler);
    }

    /// Cooperative shutdown: the loop finishes its current iteration
    /// and exits (spec §4.4 "Cancellation & shutdown").
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Observable stats snapshot (spec §4.4 "Observable stats").
    pub async fn status(&self) -> CoreResult<WorkerStatus> {
        let queue_status = self.queue.get_queue_status().await?;
        Ok(WorkerStatus::new(
            self.is_running(),
            self.config.worker_mode,
            &self.config,
            self.stats.snapshot(),
            queue_status,
        ))
    }

    /// The main loop. Runs until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(pid = self.pid, "worker runtime starting");

        while !self.stop.load(Ordering::SeqCst) {
            let throttle_remaining = self.throttle_remaining().await;
            if throttle_remaining > StdDuration::ZERO {
                tokio::time::sleep(throttle_remaining + self.config.additional_sleep_time).await;
                continue;
            }

            self.sweep().await;

            let claimed = match self.queue.claim_next(self.pid).await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "failed to claim next job");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            let Some(job) = claimed else {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };

            self.run_one(job).await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!(pid = self.pid, "worker runtime stopped");
    }

    async fn throttle_remaining(&self) -> StdDuration {
        let last = *self.last_job_time.lock().await;
        let Some(last) = last else {
            return StdDuration::ZERO;
        };
        let elapsed = Utc::now().signed_duration_since(last).to_std().unwrap_or(StdDuration::ZERO);
        self.config.min_time_between_jobs.saturating_sub(elapsed)
    }

    /// Stuck-job reclamation, then a retry-eligibility log. Never blocks
    /// throttling (spec §4.4).
    async fn sweep(&self) {
        if let Err(e) = self.sweep_stuck_jobs().await {
            warn!(error = %e, "stuck-job sweep failed");
        }
        if let Err(e) = self.log_retry_eligible_jobs().await {
            warn!(error = %e, "retry-eligibility sweep failed");
        }
    }

    async fn sweep_stuck_jobs(&self) -> CoreResult<()> {
        let mut sys = System::new_all();
        sys.refresh_all();

        for job in self.db.jobs().get_processing_jobs().await? {
            let job_dir = job_working_dir(&job, &self.config);
            if !stuck::is_stuck_candidate(&job, &job_dir, &self.config, &sys) {
                continue;
            }

            self.stats.record_stuck_detected();

            match stuck::find_output_artifact(&job_dir, &self.config.video_extensions) {
                Some(artifact) => {
                    warn!(
                        job_id = job.id,
                        path = %artifact.display(),
                        "stuck job has a completed output on disk, marking completed"
                    );
                    self.queue
                        .complete(job.id, job.media_file_id, Some(&artifact.to_string_lossy()))
                        .await?;
                }
                None => {
                    warn!(job_id = job.id, dir = %job_dir.display(), "job is stuck, marking failed");
                    self.queue
                        .fail(job.id, "stuck: worker liveness lost and no file-system progress", true)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// `claim_next` already treats `failed` rows with `retry_count <
    /// max_retries` as directly claimable (spec §4.3), transitioning
    /// them straight to `processing`. A separate `failed -> pending`
    /// reclaim step would violate the status monotonicity rule (that
    /// edge isn't in `is_valid_transition`), so this sweep is
    /// observational only.
    async fn log_retry_eligible_jobs(&self) -> CoreResult<()> {
        let eligible = self
            .db
            .jobs()
            .get_jobs_by_status(JobStatus::Failed)
            .await?
            .into_iter()
            .filter(|j| j.retry_count < j.max_retries)
            .count();
        if eligible > 0 {
            debug!(count = eligible, "jobs eligible for retry on next claim");
        }
        Ok(())
    }

    async fn run_one(&self, job: JobRecord) {
        let job_dir = job_working_dir(&job, &self.config);
        self.active_jobs.write().await.insert(
            job.id,
            ActiveJob {
                pid: self.pid,
                started_at: Utc::now(),
                job_dir,
                job_type: job.job_type.clone(),
            },
        );

        let handler = self.handlers.read().await.get(&job.job_type).cloned();

        let Some(handler) = handler else {
            warn!(job_id = job.id, job_type = %job.job_type, "no processor registered for job type");
            if let Err(e) = self
                .queue
                .fail(job.id, &format!("no processor registered for job type '{}'", job.job_type), false)
                .await
            {
                error!(job_id = job.id, error = %e, "failed to record missing-processor failure");
            }
            self.stats.record_failed();
            self.active_jobs.write().await.remove(&job.id);
            *self.last_job_time.lock().await = Some(Utc::now());
            return;
        };

        match handler.handle(&job).await {
            Ok(outcome) => {
                if let Err(e) = self
                    .queue
                    .complete(job.id, outcome.media_file_id, outcome.output_path.as_deref())
                    .await
                {
                    error!(job_id = job.id, error = %e, "failed to record job completion");
                }
                self.stats.record_processed();
            }
            Err(core_err) => {
                // A `Transient` error is retried until the last attempt,
                // at which point it is treated as permanent — spec §4.4
                // "Retry classification" ("Unknown: treated as Transient
                // until retry_count == max_retries − 1, then Permanent").
                let last_retry = job.retry_count >= job.max_retries.saturating_sub(1);
                let retryable = core_err.is_retryable() && !last_retry;

                if let Err(e) = self.queue.fail(job.id, &core_err.to_string(), retryable).await {
                    error!(job_id = job.id, error = %e, "failed to record job failure");
                }

                if retryable {
                    self.stats.record_retried();
                } else {
                    self.stats.record_failed();
                }
            }
        }

        self.active_jobs.write().await.remove(&job.id);
        *self.last_job_time.lock().await = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_db() -> Database {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn test_config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            data_dir: PathBuf::from("./data"),
            default_output_dir: PathBuf::from("./data/downloads"),
            remote_path_prefixes: vec![],
            worker_mode: crate::config::WorkerMode::Thread,
            min_time_between_jobs: StdDuration::ZERO,
            additional_sleep_time: StdDuration::ZERO,
            poll_interval: StdDuration::from_millis(10),
            stuck_job_timeout: StdDuration::from_secs(1800),
            progress_grace: StdDuration::from_secs(60),
            video_extensions: vec!["mp4".to_string(), "mkv".to_string()],
            subtitle_marker: "WhisperAI".to_string(),
            default_max_retries: 3,
            ytdlp_binary: "yt-dlp".to_string(),
            whisper_binary: "whisper".to_string(),
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl JobHandler for AlwaysSucceeds {
        async fn handle(&self, _job: &JobRecord) -> CoreResult<HandlerOutcome> {
            Ok(HandlerOutcome { media_file_id: None, output_path: Some("/tmp/out.mp4".to_string()) })
        }
    }

    struct AlwaysFailsPermanently;

    #[async_trait]
    impl JobHandler for AlwaysFailsPermanently {
        async fn handle(&self, _job: &JobRecord) -> CoreResult<HandlerOutcome> {
            Err(CoreError::Permanent("unsupported format".to_string()))
        }
    }

    #[tokio::test]
    async fn run_one_completes_job_on_handler_success() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue("download_video", "https://example/v/X", None, json!({}), 3)
            .await
            .unwrap();

        let runtime = WorkerRuntime::new(queue.clone(), db.clone(), test_config());
        runtime.register_processor("download_video", Arc::new(AlwaysSucceeds)).await;

        runtime.run_one(job.clone()).await;

        let updated = db.jobs().get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "completed");
        assert_eq!(updated.output_path.as_deref(), Some("/tmp/out.mp4"));
        assert_eq!(runtime.stats.snapshot().processed, 1);
    }

    #[tokio::test]
    async fn run_one_marks_permanent_failure_non_retryable() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue("download_video", "https://example/v/X", None, json!({}), 3)
            .await
            .unwrap();

        let runtime = WorkerRuntime::new(queue.clone(), db.clone(), test_config());
        runtime.register_processor("download_video", Arc::new(AlwaysFailsPermanently)).await;

        runtime.run_one(job.clone()).await;

        let updated = db.jobs().get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
        assert_eq!(updated.retry_count, updated.max_retries);
        assert_eq!(runtime.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn run_one_fails_job_with_no_registered_handler() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue("embed_subtitles", "/tmp/in.mp4", None, json!({}), 3)
            .await
            .unwrap();

        let runtime = WorkerRuntime::new(queue.clone(), db.clone(), test_config());
        runtime.run_one(job.clone()).await;

        let updated = db.jobs().get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
        assert!(updated.error_message.unwrap().contains("no processor"));
    }

    #[test]
    fn job_working_dir_uses_parent_of_a_file_output_path() {
        let config = test_config();

        let job = JobRecord {
            id: 1,
            media_file_id: None,
            job_type: "download_video".to_string(),
            input_path: "https://example/v/X".to_string(),
            output_path: Some("/data/staging/1/out.mp4".to_string()),
            parameters: "{}".to_string(),
            status: "processing".to_string(),
            error_message: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            started_at: Some("2024-01-01T00:00:00Z".to_string()),
            completed_at: None,
            duration_seconds: None,
            retry_count: 0,
            max_retries: 3,
            worker_pid: Some(1),
        };

        assert_eq!(job_working_dir(&job, &config), PathBuf::from("/data/staging/1"));
    }
}
