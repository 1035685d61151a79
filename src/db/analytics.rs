//! Append-only analytics event log repository (spec §3 AnalyticsEvent).

use serde_json::Value;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::now_iso8601;
use crate::error::CoreResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalyticsEventRecord {
    pub id: i64,
    pub event_type: String,
    pub media_file_id: Option<i64>,
    pub processing_job_id: Option<i64>,
    pub event_data: String,
    pub timestamp: String,
}

pub struct AnalyticsRepository {
    pool: SqlitePool,
}

impl AnalyticsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Never raises on the shape of `data`; persistence failures surface
    /// as `Storage` errors, per spec §4.1.
    pub async fn track_event(
        &self,
        event_type: &str,
        media_file_id: Option<i64>,
        processing_job_id: Option<i64>,
        data: &Value,
    ) -> CoreResult<AnalyticsEventRecord> {
        let event_data = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
        let timestamp = now_iso8601();

        let record = sqlx::query_as::<_, AnalyticsEventRecord>(
            r#"
            INSERT INTO analytics_events (event_type, media_file_id, processing_job_id, event_data, timestamp)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(event_type)
        .bind(media_file_id)
        .bind(processing_job_id)
        .bind(&event_data)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn list_for_job(&self, processing_job_id: i64) -> CoreResult<Vec<AnalyticsEventRecord>> {
        let records = sqlx::query_as::<_, AnalyticsEventRecord>(
            "SELECT * FROM analytics_events WHERE processing_job_id = ? ORDER BY id ASC",
        )
        .bind(processing_job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
