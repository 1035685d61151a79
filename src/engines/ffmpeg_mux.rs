//! Default [`Muxer`](crate::engines::Muxer) adapter, shelling out to
//! `ffmpeg` to embed a subtitle track and to `ffprobe` to detect one.
//!
//! `has_marked_subtitle_track` mirrors the ffprobe JSON-stream-inspection
//! approach used for WhisperAI-marker detection in the source system: run
//! `ffprobe -show_streams`, walk the subtitle streams, and look for the
//! marker substring (case-insensitive) in each stream's `tags.title`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tempfile::Builder;
use tokio::process::Command;
use tracing::debug;

use crate::db::transcriptions::Segment;

use super::Muxer;

pub struct FfmpegMuxer {
    ffmpeg_binary: String,
    ffprobe_binary: String,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_binary: String, ffprobe_binary: String) -> Self {
        Self { ffmpeg_binary, ffprobe_binary }
    }

    fn segments_to_srt(segments: &[Segment]) -> String {
        let mut out = String::new();
        for (i, seg) in segments.iter().enumerate() {
            out.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                format_srt_timestamp(seg.start),
                format_srt_timestamp(seg.end),
                seg.text
            ));
        }
        out
    }
}

fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as i64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    #[serde(default)]
    tags: Value,
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn embed_subtitles(
        &self,
        video_path: &Path,
        segments: &[Segment],
        marker: &str,
    ) -> Result<()> {
        let srt_file = Builder::new().suffix(".srt").tempfile()
            .context("failed to create temporary subtitle file")?;
        tokio::fs::write(srt_file.path(), Self::segments_to_srt(segments))
            .await
            .context("failed to write subtitle contents")?;

        let out_path = video_path.with_extension("muxed.tmp.mkv");

        debug!(path = %video_path.display(), "muxing subtitle track");

        let output = Command::new(&self.ffmpeg_binary)
            .arg("-y")
            .args(["-i", &video_path.to_string_lossy()])
            .args(["-i", &srt_file.path().to_string_lossy()])
            .args(["-map", "0", "-map", "1"])
            .args(["-c", "copy", "-c:s", "srt"])
            .arg("-metadata:s:s:0")
            .arg(format!("title={marker}"))
            .arg(&out_path)
            .output()
            .await
            .context("failed to execute muxer")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("muxer failed for '{}': {}", video_path.display(), stderr.trim());
        }

        tokio::fs::rename(&out_path, video_path)
            .await
            .context("failed to overwrite source file with muxed output")?;

        Ok(())
    }

    async fn has_marked_subtitle_track(&self, video_path: &Path, marker: &str) -> Result<bool> {
        let output = Command::new(&self.ffprobe_binary)
            .args(["-v", "quiet"])
            .args(["-print_format", "json"])
            .args(["-show_streams", "-show_format"])
            .arg(video_path)
            .output()
            .await;

        let output = match output {
            Ok(o) if o.status.success() => o,
            _ => return Ok(false),
        };

        let probe: ProbeOutput = match serde_json::from_slice(&output.stdout) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };

        let marker_lower = marker.to_lowercase();
        for stream in probe.streams {
            if stream.codec_type.as_deref() != Some("subtitle") {
                continue;
            }
            let title = stream
                .tags
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            if title.contains(&marker_lower) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
