//! Stuck-job detection (spec §4.4). A job sitting in `processing` whose
//! worker is no longer live and whose working directory shows no recent
//! write activity is a stuck candidate; resolving a candidate to
//! `completed` or `failed` (by checking for an output artifact) is done
//! by the caller in `worker/mod.rs`, not here.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sysinfo::{Pid, System};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::jobs::JobRecord;
use crate::db::sqlite_helpers::str_to_datetime;

/// Whether `pid` currently corresponds to a live process on this host.
/// A job that never recorded a `worker_pid` is treated as not alive.
pub fn pid_is_alive(pid: Option<i64>, sys: &System) -> bool {
    match pid {
        Some(pid) if pid > 0 => sys.process(Pid::from_u32(pid as u32)).is_some(),
        _ => false,
    }
}

/// Whether any file under `dir` has an mtime newer than
/// `started_at + progress_grace` — evidence the job is still writing.
pub fn has_recent_progress(dir: &Path, started_at: DateTime<Utc>, progress_grace: StdDuration) -> bool {
    if !dir.exists() {
        return false;
    }
    let threshold = started_at + chrono::Duration::from_std(progress_grace).unwrap_or_default();
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok()?.modified().ok())
        .any(|modified| DateTime::<Utc>::from(modified) > threshold)
}

/// The most recently modified non-empty video container directly under
/// `dir`, if any — the "expected output artifact" from spec §4.4.
pub fn find_output_artifact(dir: &Path, video_extensions: &[String]) -> Option<PathBuf> {
    if !dir.exists() {
        return None;
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| video_extensions.iter().any(|v| v.eq_ignore_ascii_case(ext)))
                .unwrap_or(false)
        })
        .filter(|entry| entry.metadata().map(|m| m.len() > 0).unwrap_or(false))
        .max_by_key(|entry| entry.metadata().and_then(|m| m.modified()).ok())
        .map(|entry| entry.path().to_path_buf())
}

/// A job in `processing` is a stuck candidate once it has sat past
/// `stuck_job_timeout`, its worker is no longer live, and no file under
/// `job_dir` shows activity newer than `started_at + progress_grace`.
/// Artifact presence is checked separately by the caller to decide
/// between `completed` and `failed`.
pub fn is_stuck_candidate(job: &JobRecord, job_dir: &Path, config: &Config, sys: &System) -> bool {
    let Some(started_at) = job.started_at.as_deref().and_then(|s| str_to_datetime(s).ok()) else {
        return false;
    };

    let timed_out = Utc::now().signed_duration_since(started_at)
        > chrono::Duration::from_std(config.stuck_job_timeout).unwrap_or_default();
    if !timed_out {
        return false;
    }

    if pid_is_alive(job.worker_pid, sys) {
        return false;
    }

    !has_recent_progress(job_dir, started_at, config.progress_grace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pid_is_alive_is_false_without_a_recorded_pid() {
        let sys = System::new();
        assert!(!pid_is_alive(None, &sys));
    }

    #[test]
    fn has_recent_progress_is_false_for_a_missing_directory() {
        assert!(!has_recent_progress(
            Path::new("/nonexistent/stuck-detection-test-dir"),
            Utc::now(),
            StdDuration::from_secs(60),
        ));
    }

    #[test]
    fn has_recent_progress_true_when_file_written_after_grace_window() {
        let dir = tempfile::tempdir().unwrap();
        let started_at = Utc::now() - chrono::Duration::seconds(120);
        fs::write(dir.path().join("partial.mp4.part"), b"data").unwrap();
        assert!(has_recent_progress(dir.path(), started_at, StdDuration::from_secs(60)));
    }

    #[test]
    fn find_output_artifact_matches_configured_extensions_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("out.mkv"), b"data").unwrap();
        fs::write(dir.path().join("notes.txt"), b"data").unwrap();
        let extensions = vec!["mkv".to_string(), "mp4".to_string()];
        assert_eq!(find_output_artifact(dir.path(), &extensions), Some(dir.path().join("out.mkv")));
    }

    #[test]
    fn find_output_artifact_ignores_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("out.mkv"), b"").unwrap();
        let extensions = vec!["mkv".to_string()];
        assert_eq!(find_output_artifact(dir.path(), &extensions), None);
    }
}
