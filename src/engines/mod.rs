//! External collaborator traits (spec §1 "opaque operation" boundary):
//! the download engine, transcription engine, and muxer. The core is
//! written against these traits and tested against fakes; the concrete
//! adapters in the submodules shell out to real CLI tools so the crate is
//! runnable end-to-end.

pub mod ffmpeg_mux;
pub mod whisper;
pub mod ytdlp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::db::transcriptions::Segment;

pub use ffmpeg_mux::FfmpegMuxer;
pub use whisper::WhisperTranscriptionEngine;
pub use ytdlp::YtDlpDownloadEngine;

/// A URL-to-local-file extractor that produces a media file plus source
/// metadata (spec §1).
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Download `url` into `output_dir` using `output_template` as a
    /// naming hint (the engine may not honor it literally; see spec §4.5
    /// step 6 for how callers resolve the real output path).
    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        output_template: &str,
    ) -> anyhow::Result<DownloadOutcome>;

    /// Resolve a playlist URL into its member entries without downloading
    /// them (spec §4.5 DownloadPlaylist step 1).
    async fn resolve_playlist(&self, url: &str) -> anyhow::Result<PlaylistMetadata>;
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// The path the engine announced as its output, if any. Per spec §4.5
    /// step 6, this is a hint, not a guarantee — the caller still
    /// verifies it exists and falls back to directory search.
    pub announced_path: Option<PathBuf>,
    pub source_metadata: Value,
}

#[derive(Debug, Clone)]
pub struct PlaylistMetadata {
    pub playlist_id: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone)]
pub struct PlaylistEntry {
    pub url: String,
    pub video_id: String,
    pub title: Option<String>,
}

/// Audio -> timed segments + detected language (spec §1).
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(&self, path: &Path) -> anyhow::Result<TranscriptionOutcome>;
}

#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub duration: Option<f64>,
}

/// Container + subtitle stream -> new container (spec §1).
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Mux `segments` into `video_path` as a subtitle track titled with
    /// the configured marker, overwriting `video_path` in place.
    async fn embed_subtitles(
        &self,
        video_path: &Path,
        segments: &[Segment],
        marker: &str,
    ) -> anyhow::Result<()>;

    /// Whether `video_path` already carries a subtitle track whose title
    /// tag contains `marker` (case-insensitive) — the smart-overwrite
    /// check (spec §4.5, §6).
    async fn has_marked_subtitle_track(&self, video_path: &Path, marker: &str) -> anyhow::Result<bool>;
}
