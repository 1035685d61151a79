//! DownloadPlaylist orchestrator (spec §4.5). Resolves playlist membership,
//! downloads (or reuses) each entry, links it into `playlist_videos`, and
//! reports an aggregate progress count.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::db::jobs::{CreateJob, JobRecord, JobStatus};
use crate::db::playlists::CreatePlaylist;
use crate::error::{CoreError, CoreResult};
use crate::worker::{HandlerOutcome, JobHandler};

use super::download_video::{download_video, DownloadVideoParams};
use super::Services;

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadPlaylistParams {
    pub url: String,
    #[serde(default)]
    pub destination_dir: Option<PathBuf>,
    /// Skip entries already tracked and already carrying a marked subtitle
    /// track (spec §4.5 "Resume semantics"). When `false`, smart-overwrite
    /// is bypassed and every entry is re-downloaded.
    #[serde(default)]
    pub continue_download: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistEntryFailure {
    pub position: i64,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadPlaylistOutcome {
    pub playlist_row_id: i64,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub remaining: i64,
    pub failures: Vec<PlaylistEntryFailure>,
}

fn platform_from_url(url: &str) -> String {
    if url.contains("youtube.com") || url.contains("youtu.be") {
        "youtube".to_string()
    } else {
        "unknown".to_string()
    }
}

/// Downloads one playlist entry under its own `ProcessingJob` row, so a
/// crash mid-playlist leaves that entry's working directory discoverable
/// by stuck-job detection exactly like a top-level download job would.
async fn download_entry(
    services: &Services,
    destination_dir: Option<PathBuf>,
    continue_download: bool,
    entry_url: &str,
) -> CoreResult<(i64, String)> {
    let params = DownloadVideoParams {
        url: entry_url.to_string(),
        destination_dir,
        force: !continue_download,
    };
    let params_json = serde_json::to_value(&params).unwrap_or_else(|_| json!({}));

    let entry_job = services
        .db
        .jobs()
        .create(CreateJob {
            media_file_id: None,
            job_type: "download_video".to_string(),
            input_path: entry_url.to_string(),
            output_path: None,
            parameters: params_json,
            max_retries: services.config.default_max_retries,
        })
        .await?;
    let entry_job: JobRecord = services.db.jobs().update_status(entry_job.id, JobStatus::Processing, None).await?;

    let result = download_video(services, &entry_job, params).await;

    match result {
        Ok(outcome) => {
            services
                .db
                .jobs()
                .complete(entry_job.id, Some(outcome.media_file_id), Some(&outcome.file_path))
                .await?;
            Ok((outcome.media_file_id, outcome.file_path))
        }
        Err(e) => {
            services.db.jobs().fail(entry_job.id, &e.to_string(), false).await?;
            Err(e)
        }
    }
}

pub async fn download_playlist(
    services: &Services,
    job: &JobRecord,
    params: DownloadPlaylistParams,
) -> CoreResult<DownloadPlaylistOutcome> {
    // Step 1: resolve playlist metadata, upsert the Playlist row.
    let metadata = services
        .download_engine
        .resolve_playlist(&params.url)
        .await
        .map_err(|e| CoreError::Transient(format!("failed to resolve playlist '{}': {e}", params.url)))?;

    let source_platform = platform_from_url(&params.url);
    let playlist = services
        .db
        .playlists()
        .upsert(CreatePlaylist {
            playlist_id: metadata.playlist_id.clone(),
            title: metadata.title.clone(),
            uploader: metadata.uploader.clone(),
            source_url: Some(params.url.clone()),
            source_platform,
            video_count: metadata.entries.len() as i64,
        })
        .await?;

    let mut completed = 0i64;
    let mut failures = Vec::new();

    // Step 2-3: per-entry reuse-or-download, then link into the playlist.
    for (index, entry) in metadata.entries.iter().enumerate() {
        let position = (index + 1) as i64;

        match download_entry(
            services,
            params.destination_dir.clone(),
            params.continue_download,
            &entry.url,
        )
        .await
        {
            Ok((media_file_id, _file_path)) => {
                match services
                    .db
                    .playlist_videos()
                    .add_video_to_playlist(playlist.id, media_file_id, position, entry.title.as_deref())
                    .await
                {
                    Ok(_) => completed += 1,
                    Err(CoreError::Conflict(_)) => {
                        // Already linked from a prior resumed run at this position.
                        completed += 1;
                    }
                    Err(e) => {
                        warn!(playlist_id = playlist.id, position, error = %e, "failed to link playlist entry");
                        failures.push(PlaylistEntryFailure {
                            position,
                            url: entry.url.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                failures.push(PlaylistEntryFailure { position, url: entry.url.clone(), reason: e.to_string() });
            }
        }
    }

    let total = metadata.entries.len() as i64;
    let failed = failures.len() as i64;
    let remaining = (total - completed - failed).max(0);

    if let Err(e) = services
        .db
        .analytics()
        .track_event(
            "playlist_completed",
            None,
            Some(job.id),
            &json!({
                "playlist_id": metadata.playlist_id,
                "total": total,
                "completed": completed,
                "failed": failed,
                "remaining": remaining,
                "failures": failures,
            }),
        )
        .await
    {
        warn!(job_id = job.id, error = %e, "failed to record playlist_completed event");
    }

    Ok(DownloadPlaylistOutcome {
        playlist_row_id: playlist.id,
        total,
        completed,
        failed,
        remaining,
        failures,
    })
}

/// Adapts [`download_playlist`] to the Worker's [`JobHandler`] seam.
pub struct DownloadPlaylistHandler {
    services: Arc<Services>,
}

impl DownloadPlaylistHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for DownloadPlaylistHandler {
    async fn handle(&self, job: &JobRecord) -> CoreResult<HandlerOutcome> {
        let params: DownloadPlaylistParams = serde_json::from_value(job.parameters())
            .map_err(|e| CoreError::Permanent(format!("invalid download_playlist parameters: {e}")))?;

        let outcome = download_playlist(&self.services, job, params).await?;
        Ok(HandlerOutcome {
            media_file_id: None,
            output_path: Some(format!("playlist:{}", outcome.playlist_row_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_from_url_detects_youtube() {
        assert_eq!(platform_from_url("https://www.youtube.com/watch?v=X"), "youtube");
        assert_eq!(platform_from_url("https://vimeo.com/123"), "unknown");
    }
}
