//! Default [`TranscriptionEngine`](crate::engines::TranscriptionEngine)
//! adapter, shelling out to a `whisper`-shaped CLI binary producing JSON
//! segments.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::db::transcriptions::Segment;

use super::{TranscriptionEngine, TranscriptionOutcome};

pub struct WhisperTranscriptionEngine {
    binary: String,
}

impl WhisperTranscriptionEngine {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    language: Option<String>,
    duration: Option<f64>,
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[async_trait]
impl TranscriptionEngine for WhisperTranscriptionEngine {
    async fn transcribe(&self, path: &Path) -> Result<TranscriptionOutcome> {
        debug!(path = %path.display(), "invoking transcription engine");

        let output = Command::new(&self.binary)
            .arg(path)
            .args(["--output_format", "json"])
            .arg("--print-to-stdout")
            .output()
            .await
            .with_context(|| format!("failed to execute transcription engine for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "transcription engine failed for '{}': {}",
                path.display(),
                stderr.trim()
            );
        }

        let parsed: WhisperOutput = serde_json::from_slice(&output.stdout)
            .context("failed to parse transcription engine JSON output")?;

        let segments = parsed
            .segments
            .into_iter()
            .map(|s| Segment { start: s.start, end: s.end, text: s.text.trim().to_string() })
            .collect();

        Ok(TranscriptionOutcome { segments, language: parsed.language, duration: parsed.duration })
    }
}
