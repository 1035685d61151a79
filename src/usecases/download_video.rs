//! DownloadVideo orchestrator (spec §4.5). A deterministic step sequence,
//! each step committing its progress to the Ledger before the next runs.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::db::jobs::JobRecord;
use crate::db::media_files::{CreateMediaFile, MediaFilePatch, MediaFileRecord};
use crate::engines::DownloadOutcome;
use crate::error::{classify_collaborator_error, CoreError, CoreResult, Retryability};
use crate::worker::{HandlerOutcome, JobHandler};

use super::Services;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadVideoParams {
    pub url: String,
    #[serde(default)]
    pub destination_dir: Option<PathBuf>,
    /// Bypass the smart-overwrite check (spec §6) and re-download even if a
    /// tracked, already-transcribed file exists. Set by `DownloadPlaylist`
    /// when `continue_download=false`.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadVideoOutcome {
    pub media_file_id: i64,
    pub file_path: String,
    pub skipped: bool,
}

/// Extract a stable video id from a URL, the way the download service's
/// YouTube-specific helper does — `v=` query param or a `youtu.be/` path
/// segment. Other platforms report no id, making the URL "non-identifiable"
/// for resolution purposes (spec §4.5 step 6c).
fn extract_video_id(url: &str) -> Option<String> {
    if url.contains("youtube.com") || url.contains("youtu.be") {
        if let Some(rest) = url.split("v=").nth(1) {
            return Some(rest.split('&').next().unwrap_or(rest).to_string());
        }
        if let Some(rest) = url.split("youtu.be/").nth(1) {
            return Some(rest.split('?').next().unwrap_or(rest).to_string());
        }
    }
    None
}

fn video_extension_match(path: &Path, video_extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| video_extensions.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Resolution order from spec §4.5 step 6: the engine's announced path
/// first, then a name-containing-id search, then most-recent-file as a
/// last resort for non-identifiable URLs, then give up.
fn resolve_output_file(
    work_dir: &Path,
    outcome: &DownloadOutcome,
    video_id: Option<&str>,
    video_extensions: &[String],
) -> Option<PathBuf> {
    if let Some(announced) = &outcome.announced_path {
        if announced.exists() && non_empty(announced) {
            return Some(announced.clone());
        }
    }

    let mut candidates: Vec<PathBuf> = walkdir::WalkDir::new(work_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| video_extension_match(p, video_extensions))
        .filter(|p| non_empty(p))
        .collect();

    if let Some(id) = video_id {
        let mut matches: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|p| p.file_name().and_then(|n| n.to_str()).map(|n| n.contains(id)).unwrap_or(false))
            .collect();
        matches.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());
        return matches.pop();
    }

    candidates.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());
    let latest = candidates.pop();
    if let Some(path) = &latest {
        warn!(path = %path.display(), "picking most recent video file for a non-identifiable URL");
    }
    latest
}

async fn content_hash(path: &Path) -> CoreResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CoreError::Transient(format!("failed to read downloaded file for hashing: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn core_err_from_collaborator(err: anyhow::Error) -> CoreError {
    match classify_collaborator_error(&err) {
        Retryability::Transient => CoreError::Transient(err.to_string()),
        Retryability::Permanent => CoreError::Permanent(err.to_string()),
    }
}

/// Idempotent MediaFile tracking (spec §4.5 step 7): update an existing row
/// at `final_path`, or migrate one found at the metadata's recorded
/// `original_path`, or create a fresh row.
async fn track_media_file(
    services: &Services,
    resolved_path: &Path,
    final_path: &Path,
    url: &str,
    video_id: Option<&str>,
    source_metadata: &Value,
) -> CoreResult<MediaFileRecord> {
    let file_meta = std::fs::metadata(resolved_path)
        .map_err(|e| CoreError::Transient(format!("failed to stat downloaded file: {e}")))?;
    let file_hash = content_hash(resolved_path).await?;
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let mime_type = mime_guess::from_path(final_path)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "video/mp4".to_string());

    let title = source_metadata.get("title").and_then(Value::as_str).map(str::to_string);
    let description = source_metadata.get("description").and_then(Value::as_str).map(str::to_string);
    let uploader = source_metadata.get("uploader").and_then(Value::as_str).map(str::to_string);
    let view_count = source_metadata.get("view_count").and_then(Value::as_i64);
    let like_count = source_metadata.get("like_count").and_then(Value::as_i64);
    let duration = source_metadata.get("duration").and_then(Value::as_f64);
    let thumbnail_url = source_metadata.get("thumbnail").and_then(Value::as_str).map(str::to_string);

    let patch = MediaFilePatch {
        file_path: Some(final_path.to_string_lossy().to_string()),
        file_size: Some(file_meta.len() as i64),
        file_hash: Some(file_hash.clone()),
        title: title.clone(),
        description: description.clone(),
        uploader: uploader.clone(),
        view_count,
        like_count,
        duration,
        thumbnail_url: thumbnail_url.clone(),
    };

    let media_repo = services.db.media_files();

    if let Some(existing) = media_repo.get_by_file_path(&final_path.to_string_lossy()).await? {
        return media_repo.update(existing.id, patch).await;
    }

    if let Some(original_path) = source_metadata.get("original_path").and_then(Value::as_str) {
        if let Some(existing) = media_repo.get_by_file_path(original_path).await? {
            return media_repo.update(existing.id, patch).await;
        }
    }

    media_repo
        .create(CreateMediaFile {
            file_path: final_path.to_string_lossy().to_string(),
            file_name,
            file_size: file_meta.len() as i64,
            file_hash,
            media_type: "video".to_string(),
            mime_type,
            file_device: Some(file_meta.dev() as i64),
            file_inode: Some(file_meta.ino() as i64),
            file_identifier: None,
            source_url: Some(url.to_string()),
            source_platform: source_metadata.get("extractor").and_then(Value::as_str).map(str::to_string),
            source_id: video_id
                .map(str::to_string)
                .or_else(|| source_metadata.get("id").and_then(Value::as_str).map(str::to_string)),
            title,
            description,
            uploader,
            uploader_id: source_metadata.get("uploader_id").and_then(Value::as_str).map(str::to_string),
            upload_date: source_metadata.get("upload_date").and_then(Value::as_str).map(str::to_string),
            view_count,
            like_count,
            duration,
            language: source_metadata.get("language").and_then(Value::as_str).map(str::to_string),
            thumbnail_url,
        })
        .await
}

/// Whether `video_id` already has a tracked, still-present file carrying a
/// marked subtitle track — the smart-overwrite rule (spec §4.5, §6).
async fn already_transcribed(services: &Services, video_id: &str) -> CoreResult<Option<MediaFileRecord>> {
    let Some(existing) = services.db.media_files().get_by_source_id(video_id).await? else {
        return Ok(None);
    };
    let path = Path::new(&existing.file_path);
    if !path.exists() {
        return Ok(None);
    }
    let marked = services
        .muxer
        .has_marked_subtitle_track(path, &services.config.subtitle_marker)
        .await
        .unwrap_or(false);
    Ok(if marked { Some(existing) } else { None })
}

pub async fn download_video(
    services: &Services,
    job: &JobRecord,
    params: DownloadVideoParams,
) -> CoreResult<DownloadVideoOutcome> {
    // Step 1: resolve the destination directory and classify it.
    let destination_dir = params
        .destination_dir
        .clone()
        .unwrap_or_else(|| services.config.default_output_dir.clone());

    if !services.storage.can_write_to(&destination_dir).await {
        return Err(CoreError::Permanent(format!(
            "destination {} is not writable",
            destination_dir.display()
        )));
    }

    let video_id = extract_video_id(&params.url);

    // Smart-overwrite (spec §6): already-tracked and already-marked, skip.
    if !params.force {
        if let Some(id) = &video_id {
            if let Some(existing) = already_transcribed(services, id).await? {
                return Ok(DownloadVideoOutcome {
                    media_file_id: existing.id,
                    file_path: existing.file_path,
                    skipped: true,
                });
            }
        }
    }

    // Step 3: staging directory if remote, otherwise work in place.
    // The job's working directory is persisted into `output_path`
    // immediately so stuck-job detection can find it after a crash, before
    // any real output file exists.
    let is_remote = services.storage.is_remote(&destination_dir);
    let work_dir = if is_remote {
        services.storage.stage_dir_for(job.id).await?
    } else {
        destination_dir.clone()
    };
    services.db.jobs().update(job.id, None, Some(&work_dir.to_string_lossy())).await?;

    if let Err(e) = services
        .db
        .analytics()
        .track_event("download_start", None, Some(job.id), &json!({ "url": params.url }))
        .await
    {
        warn!(job_id = job.id, error = %e, "failed to record download_start event");
    }

    // Step 5: invoke the download engine with a normalized output template.
    let download_result = services
        .download_engine
        .download(&params.url, &work_dir, "%(id)s.%(ext)s")
        .await;

    let outcome = match download_result {
        Ok(outcome) => outcome,
        Err(e) => {
            if is_remote {
                services.storage.cleanup(&work_dir).await;
            }
            return Err(core_err_from_collaborator(e));
        }
    };

    // Step 6: resolve the actual output file.
    let resolved_path = match resolve_output_file(&work_dir, &outcome, video_id.as_deref(), &services.config.video_extensions) {
        Some(path) => path,
        None => {
            if is_remote {
                services.storage.cleanup(&work_dir).await;
            }
            return Err(CoreError::Permanent(format!(
                "download engine produced no usable output for '{}'",
                params.url
            )));
        }
    };

    let final_path = if is_remote {
        destination_dir.join(resolved_path.file_name().unwrap_or_default())
    } else {
        resolved_path.clone()
    };

    // Step 7: idempotent MediaFile tracking.
    let media_file = track_media_file(
        services,
        &resolved_path,
        &final_path,
        &params.url,
        video_id.as_deref(),
        &outcome.source_metadata,
    )
    .await?;

    // Step 8: publish to the final destination when staged remotely.
    if is_remote {
        if let Err(e) = services.storage.publish(&resolved_path, &final_path).await {
            services.storage.cleanup(&work_dir).await;
            return Err(e);
        }
        services.storage.cleanup(&work_dir).await;
    }

    // Step 9: completion + analytics.
    if let Err(e) = services
        .db
        .analytics()
        .track_event(
            "download_completed",
            Some(media_file.id),
            Some(job.id),
            &json!({ "file_path": final_path.to_string_lossy() }),
        )
        .await
    {
        warn!(job_id = job.id, error = %e, "failed to record download_completed event");
    }

    Ok(DownloadVideoOutcome {
        media_file_id: media_file.id,
        file_path: final_path.to_string_lossy().to_string(),
        skipped: false,
    })
}

/// Adapts [`download_video`] to the Worker's [`JobHandler`] seam, parsing
/// `job.parameters()` into [`DownloadVideoParams`].
pub struct DownloadVideoHandler {
    services: Arc<Services>,
}

impl DownloadVideoHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for DownloadVideoHandler {
    async fn handle(&self, job: &JobRecord) -> CoreResult<HandlerOutcome> {
        let params: DownloadVideoParams = serde_json::from_value(job.parameters())
            .map_err(|e| CoreError::Permanent(format!("invalid download_video parameters: {e}")))?;

        let outcome = download_video(&self.services, job, params).await?;
        Ok(HandlerOutcome {
            media_file_id: Some(outcome.media_file_id),
            output_path: Some(outcome.file_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_video_id_from_v_query_param() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=ABCDEFGHIJK&t=5"),
            Some("ABCDEFGHIJK".to_string())
        );
    }

    #[test]
    fn extracts_video_id_from_short_url() {
        assert_eq!(
            extract_video_id("https://youtu.be/ABCDEFGHIJK?t=5"),
            Some("ABCDEFGHIJK".to_string())
        );
    }

    #[test]
    fn non_youtube_url_has_no_video_id() {
        assert_eq!(extract_video_id("https://example.com/clip.mp4"), None);
    }

    #[test]
    fn resolve_output_file_prefers_announced_path_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let announced = dir.path().join("announced.mp4");
        std::fs::write(&announced, b"data").unwrap();
        std::fs::write(dir.path().join("other.mp4"), b"data").unwrap();

        let outcome = DownloadOutcome { announced_path: Some(announced.clone()), source_metadata: json!({}) };
        let resolved = resolve_output_file(dir.path(), &outcome, None, &["mp4".to_string()]);
        assert_eq!(resolved, Some(announced));
    }

    #[test]
    fn resolve_output_file_falls_back_to_id_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ABCDEFGHIJK.mp4"), b"data").unwrap();
        std::fs::write(dir.path().join("unrelated.mp4"), b"data").unwrap();

        let outcome = DownloadOutcome { announced_path: None, source_metadata: json!({}) };
        let resolved = resolve_output_file(dir.path(), &outcome, Some("ABCDEFGHIJK"), &["mp4".to_string()]);
        assert_eq!(resolved, Some(dir.path().join("ABCDEFGHIJK.mp4")));
    }

    #[test]
    fn resolve_output_file_gives_up_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = DownloadOutcome { announced_path: None, source_metadata: json!({}) };
        assert_eq!(resolve_output_file(dir.path(), &outcome, Some("XYZ"), &["mp4".to_string()]), None);
    }
}
