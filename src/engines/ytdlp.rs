//! Default [`DownloadEngine`](crate::engines::DownloadEngine) adapter,
//! shelling out to a `yt-dlp`-shaped CLI binary.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::{DownloadEngine, DownloadOutcome, PlaylistEntry, PlaylistMetadata};

pub struct YtDlpDownloadEngine {
    binary: String,
}

impl YtDlpDownloadEngine {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl DownloadEngine for YtDlpDownloadEngine {
    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        output_template: &str,
    ) -> Result<DownloadOutcome> {
        let template_path = output_dir.join(output_template);

        debug!(url, dir = %output_dir.display(), "invoking download engine");

        let output = Command::new(&self.binary)
            .arg("--no-playlist")
            .arg("--print-json")
            .args(["-o", &template_path.to_string_lossy()])
            .arg(url)
            .output()
            .await
            .with_context(|| format!("failed to execute download engine for '{url}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("download engine failed for '{url}': {}", stderr.trim());
        }

        let metadata: Value = serde_json::from_slice(&output.stdout)
            .context("failed to parse download engine JSON output")?;

        let announced_path = metadata
            .get("filepath")
            .or_else(|| metadata.get("_filename"))
            .and_then(Value::as_str)
            .map(PathBuf::from);

        Ok(DownloadOutcome { announced_path, source_metadata: metadata })
    }

    async fn resolve_playlist(&self, url: &str) -> Result<PlaylistMetadata> {
        let output = Command::new(&self.binary)
            .arg("--flat-playlist")
            .arg("--print-json")
            .arg(url)
            .output()
            .await
            .with_context(|| format!("failed to resolve playlist '{url}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("playlist resolution failed for '{url}': {}", stderr.trim());
        }

        let mut entries = Vec::new();
        let mut playlist_id = None;
        let mut title = None;
        let mut uploader = None;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: Value = serde_json::from_str(line)
                .context("failed to parse playlist entry JSON")?;

            if playlist_id.is_none() {
                playlist_id = entry
                    .get("playlist_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                title = entry.get("playlist_title").and_then(Value::as_str).map(str::to_string);
                uploader = entry.get("playlist_uploader").and_then(Value::as_str).map(str::to_string);
            }

            let video_id = entry
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let entry_url = entry
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://example/v/{video_id}"));

            entries.push(PlaylistEntry {
                url: entry_url,
                video_id,
                title: entry.get("title").and_then(Value::as_str).map(str::to_string),
            });
        }

        Ok(PlaylistMetadata {
            playlist_id: playlist_id.unwrap_or_else(|| url.to_string()),
            title,
            uploader,
            entries,
        })
    }
}
