//! TranscribeVideo orchestrator (spec §4.5).

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::db::jobs::JobRecord;
use crate::db::media_files::{CreateMediaFile, MediaFileRecord};
use crate::db::transcriptions::TranscriptionPayload;
use crate::error::{classify_collaborator_error, CoreError, CoreResult, Retryability};
use crate::worker::{HandlerOutcome, JobHandler};

use super::Services;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeVideoParams {
    pub file_path: PathBuf,
    #[serde(default)]
    pub media_file_id: Option<i64>,
    /// Mux the resulting segments back into the video as a subtitle track
    /// (spec §4.5 step 5). Off by default — a bare transcription request
    /// does not imply the caller also wants the file rewritten.
    #[serde(default)]
    pub embed_subtitles: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscribeVideoOutcome {
    pub media_file_id: i64,
    pub transcription_id: i64,
    pub embedded: bool,
    pub skipped: bool,
}

fn core_err_from_collaborator(err: anyhow::Error) -> CoreError {
    match classify_collaborator_error(&err) {
        Retryability::Transient => CoreError::Transient(err.to_string()),
        Retryability::Permanent => CoreError::Permanent(err.to_string()),
    }
}

async fn content_hash(path: &Path) -> CoreResult<String> {
    use sha2::{Digest, Sha256};
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CoreError::Transient(format!("failed to read file for hashing: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Track an untracked file as a fresh `MediaFile` row (spec §4.5 step 2).
async fn track_untracked_file(services: &Services, path: &Path) -> CoreResult<MediaFileRecord> {
    let meta = std::fs::metadata(path)
        .map_err(|e| CoreError::Permanent(format!("target file does not exist: {e}")))?;
    let file_hash = content_hash(path).await?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
    let mime_type = mime_guess::from_path(path).first().map(|m| m.to_string()).unwrap_or_else(|| "video/mp4".to_string());
    let media_type = if mime_type.starts_with("audio/") { "audio" } else { "video" }.to_string();

    services
        .db
        .media_files()
        .create(CreateMediaFile {
            file_path: path.to_string_lossy().to_string(),
            file_name,
            file_size: meta.len() as i64,
            file_hash,
            media_type,
            mime_type,
            file_device: Some(meta.dev() as i64),
            file_inode: Some(meta.ino() as i64),
            ..Default::default()
        })
        .await
}

pub async fn transcribe_video(
    services: &Services,
    job: &JobRecord,
    params: TranscribeVideoParams,
) -> CoreResult<TranscribeVideoOutcome> {
    // Step 1: ensure the target file exists.
    if !params.file_path.exists() {
        return Err(CoreError::Permanent(format!(
            "target file does not exist: {}",
            params.file_path.display()
        )));
    }

    // Smart-overwrite (spec §6): already carries a marked subtitle track.
    let already_marked = services
        .muxer
        .has_marked_subtitle_track(&params.file_path, &services.config.subtitle_marker)
        .await
        .unwrap_or(false);
    if already_marked {
        let media_file = match params.media_file_id {
            Some(id) => services
                .db
                .media_files()
                .get_by_id(id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("media file {id}")))?,
            None => match services.db.media_files().get_by_file_path(&params.file_path.to_string_lossy()).await? {
                Some(existing) => existing,
                None => track_untracked_file(services, &params.file_path).await?,
            },
        };
        let transcription_id = services
            .db
            .transcriptions()
            .get(media_file.id)
            .await?
            .map(|t| t.id)
            .unwrap_or(0);
        return Ok(TranscribeVideoOutcome {
            media_file_id: media_file.id,
            transcription_id,
            embedded: true,
            skipped: true,
        });
    }

    // Step 2: track the file if no media_file_id was supplied.
    let media_file = match params.media_file_id {
        Some(id) => services
            .db
            .media_files()
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("media file {id}")))?,
        None => match services.db.media_files().get_by_file_path(&params.file_path.to_string_lossy()).await? {
            Some(existing) => existing,
            None => track_untracked_file(services, &params.file_path).await?,
        },
    };

    // Step 3: transcription_start event.
    if let Err(e) = services
        .db
        .analytics()
        .track_event("transcription_start", Some(media_file.id), Some(job.id), &json!({}))
        .await
    {
        warn!(job_id = job.id, error = %e, "failed to record transcription_start event");
    }

    // Step 4: invoke the transcription engine and persist the result.
    let transcribed = match services.transcription_engine.transcribe(&params.file_path).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let core_err = core_err_from_collaborator(e);
            if let Err(track_err) = services
                .db
                .analytics()
                .track_event(
                    "transcription_error",
                    Some(media_file.id),
                    Some(job.id),
                    &json!({ "error": core_err.to_string() }),
                )
                .await
            {
                warn!(job_id = job.id, error = %track_err, "failed to record transcription_error event");
            }
            return Err(core_err);
        }
    };

    let transcription = services
        .db
        .transcriptions()
        .store(
            media_file.id,
            TranscriptionPayload {
                language: transcribed.language,
                duration: transcribed.duration,
                processing_time: None,
                model_used: None,
                segments: transcribed.segments.clone(),
            },
        )
        .await?;

    // Step 5: optional subtitle embedding. A mux failure does not roll
    // back the transcription that was just persisted.
    let mut embedded = false;
    if params.embed_subtitles {
        match services
            .muxer
            .embed_subtitles(&params.file_path, &transcribed.segments, &services.config.subtitle_marker)
            .await
        {
            Ok(()) => embedded = true,
            Err(e) => {
                if let Err(track_err) = services
                    .db
                    .analytics()
                    .track_event(
                        "subtitle_embedding_error",
                        Some(media_file.id),
                        Some(job.id),
                        &json!({ "error": e.to_string() }),
                    )
                    .await
                {
                    warn!(job_id = job.id, error = %track_err, "failed to record subtitle_embedding_error event");
                }
            }
        }
    }

    Ok(TranscribeVideoOutcome {
        media_file_id: media_file.id,
        transcription_id: transcription.id,
        embedded,
        skipped: false,
    })
}

/// Adapts [`transcribe_video`] to the Worker's [`JobHandler`] seam.
pub struct TranscribeVideoHandler {
    services: Arc<Services>,
}

impl TranscribeVideoHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for TranscribeVideoHandler {
    async fn handle(&self, job: &JobRecord) -> CoreResult<HandlerOutcome> {
        let params: TranscribeVideoParams = serde_json::from_value(job.parameters())
            .map_err(|e| CoreError::Permanent(format!("invalid transcribe parameters: {e}")))?;

        let outcome = transcribe_video(&self.services, job, params.clone()).await?;
        Ok(HandlerOutcome {
            media_file_id: Some(outcome.media_file_id),
            output_path: Some(params.file_path.to_string_lossy().to_string()),
        })
    }
}
