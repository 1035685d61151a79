//! Transcription ledger repository, including full-text search over the
//! `transcriptions_fts` shadow table (spec §3 Transcription, §4.1).

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::now_iso8601;
use crate::error::{CoreError, CoreResult};

/// One timed span of spoken content. `start <= end` and segments within a
/// transcription are chronologically sorted and non-overlapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TranscriptionRecord {
    pub id: i64,
    pub media_file_id: i64,
    pub language: Option<String>,
    pub duration: Option<f64>,
    pub processing_time: Option<f64>,
    pub model_used: Option<String>,
    pub segments_json: String,
    pub full_text: String,
    pub created_at: String,
}

impl TranscriptionRecord {
    pub fn segments(&self) -> Vec<Segment> {
        serde_json::from_str(&self.segments_json).unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct TranscriptionPayload {
    pub language: Option<String>,
    pub duration: Option<f64>,
    pub processing_time: Option<f64>,
    pub model_used: Option<String>,
    pub segments: Vec<Segment>,
}

/// Join segment texts with a single space — the deterministic rule
/// `full_text = join(" ", [s.text for s in segments])` from spec §3.
fn join_full_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Segments must be sorted and non-overlapping: `start_i <= end_i <= start_{i+1}`.
fn validate_segments(segments: &[Segment]) -> CoreResult<()> {
    for pair in segments.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.start > a.end || a.end > b.start {
            return Err(CoreError::Permanent(
                "transcription segments must be sorted and non-overlapping".to_string(),
            ));
        }
    }
    if let Some(first) = segments.first() {
        if first.start > first.end {
            return Err(CoreError::Permanent(
                "transcription segment start must not exceed its end".to_string(),
            ));
        }
    }
    Ok(())
}

pub struct TranscriptionRepository {
    pool: SqlitePool,
}

impl TranscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn store(
        &self,
        media_file_id: i64,
        payload: TranscriptionPayload,
    ) -> CoreResult<TranscriptionRecord> {
        validate_segments(&payload.segments)?;

        let full_text = join_full_text(&payload.segments);
        let segments_json =
            serde_json::to_string(&payload.segments).unwrap_or_else(|_| "[]".to_string());
        let created_at = now_iso8601();

        // The transcriptions_fts virtual table is synchronized by the
        // AFTER INSERT/UPDATE/DELETE triggers defined alongside the base
        // table, so a plain insert here keeps both in the same commit.
        let record = sqlx::query_as::<_, TranscriptionRecord>(
            r#"
            INSERT INTO transcriptions (
                media_file_id, language, duration, processing_time, model_used,
                segments_json, full_text, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(media_file_id)
        .bind(&payload.language)
        .bind(payload.duration)
        .bind(payload.processing_time)
        .bind(&payload.model_used)
        .bind(&segments_json)
        .bind(&full_text)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get(&self, media_file_id: i64) -> CoreResult<Option<TranscriptionRecord>> {
        let record = sqlx::query_as::<_, TranscriptionRecord>(
            "SELECT * FROM transcriptions WHERE media_file_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(media_file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Ranked full-text search over `full_text`, restricted to rows
    /// visible at commit time (a plain `fts5 MATCH` join satisfies this
    /// since SQLite queries never observe uncommitted writes from other
    /// connections).
    pub async fn search(&self, query: &str, limit: i64) -> CoreResult<Vec<TranscriptionRecord>> {
        let records = sqlx::query_as::<_, TranscriptionRecord>(
            r#"
            SELECT t.* FROM transcriptions t
            JOIN transcriptions_fts fts ON fts.rowid = t.id
            WHERE transcriptions_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
