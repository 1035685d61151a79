//! Application configuration management.
//!
//! Loaded once from the environment at startup into an immutable record and
//! threaded through every call site via [`crate::usecases::Services`] — no
//! module-level mutable configuration singleton.

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// How the worker runtime is deployed. Mode never changes correctness, only
/// where the process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Cooperative, runs inside the same process as the caller.
    Thread,
    /// Long-lived background process with a PID/lock file.
    Daemon,
    /// Resolved to `Daemon` or `Thread` by the environment at startup.
    Auto,
}

impl WorkerMode {
    fn from_env() -> Self {
        match env::var("WORKER_MODE").ok().as_deref() {
            Some("thread") => WorkerMode::Thread,
            Some("daemon") => WorkerMode::Daemon,
            _ => WorkerMode::Auto,
        }
    }

    /// Resolve `Auto` into a concrete mode. `LIBRARIAN_DAEMON=1` selects
    /// `Daemon`; otherwise the default is `Thread`.
    pub fn resolved(self) -> WorkerMode {
        match self {
            WorkerMode::Auto => {
                let daemon = env::var("LIBRARIAN_DAEMON")
                    .map(|v| v == "1" || v == "true")
                    .unwrap_or(false);
                if daemon { WorkerMode::Daemon } else { WorkerMode::Thread }
            }
            other => other,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (e.g. `sqlite://data/ledger.db`).
    pub database_url: String,

    /// Base data directory. Holds the ledger, worker PID/lock files, and
    /// per-job staging directories.
    pub data_dir: PathBuf,

    /// Default destination directory for downloads when a use case doesn't
    /// receive an explicit one.
    pub default_output_dir: PathBuf,

    /// Path prefixes that classify a destination as remote storage.
    /// Matched case-insensitively against the resolved destination path.
    pub remote_path_prefixes: Vec<String>,

    /// How the worker runtime is deployed.
    pub worker_mode: WorkerMode,

    /// Minimum time between successive job claims (throttling).
    pub min_time_between_jobs: Duration,

    /// Extra sleep applied on top of throttling, if any.
    pub additional_sleep_time: Duration,

    /// How long the worker sleeps when the queue is empty.
    pub poll_interval: Duration,

    /// How long a job may sit in `processing` with no liveness signal
    /// before it is considered for stuck-job reclamation.
    pub stuck_job_timeout: Duration,

    /// Grace period after `started_at` during which the absence of a
    /// fresh mtime under the job's working directory does not yet count
    /// as "no progress".
    pub progress_grace: Duration,

    /// Video container extensions recognized when resolving a download
    /// engine's actual output file.
    pub video_extensions: Vec<String>,

    /// Marker embedded in subtitle track title tags identifying
    /// system-produced transcriptions.
    pub subtitle_marker: String,

    /// Default max retries for newly enqueued jobs.
    pub default_max_retries: i64,

    /// Path to the yt-dlp-shaped download engine binary.
    pub ytdlp_binary: String,

    /// Path to the whisper-shaped transcription engine binary.
    pub whisper_binary: String,

    /// Path to ffmpeg, used for muxing subtitles and probing streams.
    pub ffmpeg_binary: String,

    /// Path to ffprobe, used for stream inspection.
    pub ffprobe_binary: String,
}

impl Config {
    /// Load configuration from environment variables, applying defaults
    /// where a variable is unset.
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(
            env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}/ledger.db", data_dir.display())
        });

        let default_output_dir = PathBuf::from(
            env::var("DOWNLOADS_PATH")
                .unwrap_or_else(|_| data_dir.join("downloads").display().to_string()),
        );

        let remote_path_prefixes = env::var("REMOTE_PATH_PREFIXES")
            .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).collect())
            .unwrap_or_else(|_| {
                vec![
                    "/volumes/".to_string(),
                    "/mnt/".to_string(),
                    "//".to_string(),
                    "smb://".to_string(),
                    "nfs://".to_string(),
                ]
            });

        let video_extensions = env::var("VIDEO_EXTENSIONS")
            .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).collect())
            .unwrap_or_else(|_| {
                ["mp4", "mkv", "webm", "mov", "avi", "m4v"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        Ok(Self {
            database_url,
            data_dir,
            default_output_dir,
            remote_path_prefixes,
            worker_mode: WorkerMode::from_env(),
            min_time_between_jobs: Duration::from_secs(parse_env_u64(
                "MIN_TIME_BETWEEN_JOBS_SECS",
                0,
            )?),
            additional_sleep_time: Duration::from_secs(parse_env_u64(
                "ADDITIONAL_SLEEP_TIME_SECS",
                0,
            )?),
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 5)?),
            stuck_job_timeout: Duration::from_secs(parse_env_u64(
                "STUCK_JOB_TIMEOUT_SECS",
                1800,
            )?),
            progress_grace: Duration::from_secs(parse_env_u64("PROGRESS_GRACE_SECS", 60)?),
            video_extensions,
            subtitle_marker: env::var("SUBTITLE_MARKER")
                .unwrap_or_else(|_| "WhisperAI".to_string()),
            default_max_retries: env::var("DEFAULT_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid DEFAULT_MAX_RETRIES")?,
            ytdlp_binary: env::var("YTDLP_BINARY").unwrap_or_else(|_| "yt-dlp".to_string()),
            whisper_binary: env::var("WHISPER_BINARY").unwrap_or_else(|_| "whisper".to_string()),
            ffmpeg_binary: env::var("FFMPEG_BINARY").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_binary: env::var("FFPROBE_BINARY").unwrap_or_else(|_| "ffprobe".to_string()),
        })
    }

    /// Path to the worker PID file (daemon mode).
    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("worker.pid")
    }

    /// Path to the worker advisory lock file (daemon mode).
    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join("worker.lock")
    }

    /// Base directory for per-job staging directories.
    pub fn staging_root(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    /// Acquire the daemon lock and write the PID file (spec §6 "Persisted
    /// state layout"). The lock file is created exclusively, so a second
    /// daemon started against the same data directory fails here instead
    /// of racing the first one for jobs.
    pub fn acquire_daemon_lock(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create data directory {}", self.data_dir.display()))?;

        OpenOptions::new().write(true).create_new(true).open(self.lock_file()).with_context(|| {
            format!(
                "worker already running: lock file exists at {}",
                self.lock_file().display()
            )
        })?;

        std::fs::write(self.pid_file(), std::process::id().to_string())
            .context("failed to write worker PID file")?;

        Ok(())
    }

    /// Release the daemon lock and PID file. Best-effort: a missing file
    /// is not an error, since shutdown may run after a partial acquire.
    pub fn release_daemon_lock(&self) {
        let _ = std::fs::remove_file(self.pid_file());
        let _ = std::fs::remove_file(self.lock_file());
    }
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("Invalid {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_mode_auto_resolves_to_thread_by_default() {
        unsafe {
            env::remove_var("LIBRARIAN_DAEMON");
        }
        assert_eq!(WorkerMode::Auto.resolved(), WorkerMode::Thread);
    }

    #[test]
    fn worker_mode_auto_resolves_to_daemon_when_env_set() {
        unsafe {
            env::set_var("LIBRARIAN_DAEMON", "1");
        }
        assert_eq!(WorkerMode::Auto.resolved(), WorkerMode::Daemon);
        unsafe {
            env::remove_var("LIBRARIAN_DAEMON");
        }
    }

    fn config_for(data_dir: PathBuf) -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            data_dir,
            default_output_dir: PathBuf::from("./downloads"),
            remote_path_prefixes: vec![],
            worker_mode: WorkerMode::Daemon,
            min_time_between_jobs: Duration::ZERO,
            additional_sleep_time: Duration::ZERO,
            poll_interval: Duration::from_secs(1),
            stuck_job_timeout: Duration::from_secs(1800),
            progress_grace: Duration::from_secs(60),
            video_extensions: vec!["mp4".to_string()],
            subtitle_marker: "WhisperAI".to_string(),
            default_max_retries: 3,
            ytdlp_binary: "yt-dlp".to_string(),
            whisper_binary: "whisper".to_string(),
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
        }
    }

    #[test]
    fn acquire_daemon_lock_writes_pid_and_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path().to_path_buf());

        config.acquire_daemon_lock().unwrap();

        assert!(config.pid_file().exists());
        assert!(config.lock_file().exists());
        let pid: u32 = std::fs::read_to_string(config.pid_file()).unwrap().parse().unwrap();
        assert_eq!(pid, std::process::id());

        config.release_daemon_lock();
        assert!(!config.pid_file().exists());
        assert!(!config.lock_file().exists());
    }

    #[test]
    fn acquire_daemon_lock_rejects_a_second_daemon_in_the_same_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path().to_path_buf());

        config.acquire_daemon_lock().unwrap();
        let second = config.acquire_daemon_lock();
        assert!(second.is_err());

        config.release_daemon_lock();
    }

    #[test]
    fn release_daemon_lock_is_a_no_op_when_nothing_was_acquired() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path().to_path_buf());
        config.release_daemon_lock();
    }
}
