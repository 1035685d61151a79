//! Processing job ledger repository — the durable backing store for the
//! Job Queue (spec §4.1, §4.3).

use serde_json::Value;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::{now_iso8601, str_to_datetime};
use crate::error::{CoreError, CoreResult};

/// A unit of work (spec §3 ProcessingJob).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub media_file_id: Option<i64>,
    pub job_type: String,
    pub input_path: String,
    pub output_path: Option<String>,
    pub parameters: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub worker_pid: Option<i64>,
}

impl JobRecord {
    pub fn parameters(&self) -> Value {
        serde_json::from_str(&self.parameters).unwrap_or(Value::Null)
    }
}

/// Every non-terminal status a job may occupy plus the two terminal ones.
/// Transitions enforced by [`JobRepository::update_status`] follow the
/// monotone path `pending -> processing -> (completed|failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::Fatal(format!("unknown job status: {other}"))),
        }
    }
}

/// Only these edges are permitted by `update_status`. Any other requested
/// transition is an `InvalidTransition`.
fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, Processing) | (Processing, Completed) | (Processing, Failed) | (Failed, Processing)
    )
}

#[derive(Debug, Default)]
pub struct CreateJob {
    pub media_file_id: Option<i64>,
    pub job_type: String,
    pub input_path: String,
    pub output_path: Option<String>,
    pub parameters: Value,
    pub max_retries: i64,
}

pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: CreateJob) -> CoreResult<JobRecord> {
        let created_at = now_iso8601();
        let params = serde_json::to_string(&input.parameters).unwrap_or_else(|_| "{}".to_string());
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO processing_jobs (
                media_file_id, job_type, input_path, output_path, parameters,
                status, created_at, retry_count, max_retries
            )
            VALUES (?, ?, ?, ?, ?, 'pending', ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(input.media_file_id)
        .bind(&input.job_type)
        .bind(&input.input_path)
        .bind(&input.output_path)
        .bind(&params)
        .bind(&created_at)
        .bind(input.max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> CoreResult<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM processing_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Link a completed job to its produced media file and/or output path.
    pub async fn update(
        &self,
        id: i64,
        media_file_id: Option<i64>,
        output_path: Option<&str>,
    ) -> CoreResult<JobRecord> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;

        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE processing_jobs SET
                media_file_id = COALESCE(?, media_file_id),
                output_path = COALESCE(?, output_path)
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(media_file_id)
        .bind(output_path)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// The sole entry point for status changes. Enforces monotonicity, sets
    /// `started_at` on `pending -> processing`, and on any terminal edge
    /// sets `completed_at` plus `duration_seconds` when `started_at` exists.
    pub async fn update_status(
        &self,
        id: i64,
        new_status: JobStatus,
        error_message: Option<&str>,
    ) -> CoreResult<JobRecord> {
        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;

        let current: JobStatus = existing.status.parse()?;
        if !is_valid_transition(current, new_status) {
            return Err(CoreError::InvalidTransition(format!(
                "{} -> {}",
                current.as_str(),
                new_status.as_str()
            )));
        }

        let now = now_iso8601();
        let started_at = if matches!(new_status, JobStatus::Processing) && existing.started_at.is_none() {
            Some(now.clone())
        } else {
            existing.started_at.clone()
        };

        let (completed_at, duration_seconds) =
            if matches!(new_status, JobStatus::Completed | JobStatus::Failed) {
                let duration = started_at.as_deref().and_then(|s| {
                    let start = str_to_datetime(s).ok()?;
                    let end = str_to_datetime(&now).ok()?;
                    Some((end - start).num_milliseconds() as f64 / 1000.0)
                });
                (Some(now.clone()), duration)
            } else {
                (existing.completed_at.clone(), existing.duration_seconds)
            };

        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE processing_jobs SET
                status = ?,
                error_message = ?,
                started_at = ?,
                completed_at = ?,
                duration_seconds = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(new_status.as_str())
        .bind(error_message)
        .bind(&started_at)
        .bind(&completed_at)
        .bind(duration_seconds)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Atomically claim the oldest claimable job: a `pending` row, or a
    /// `failed` row with `retry_count < max_retries`. A conditional update
    /// keyed on the row's current status guarantees two concurrent
    /// claimers never receive the same job — the write either affects
    /// exactly one row (this claimer wins) or zero rows (someone else
    /// already claimed it).
    ///
    /// Refuses to claim a job whose target media file already has another
    /// job `processing`, enforcing one in-flight job per media file
    /// without a separate lock table.
    pub async fn claim_next(&self, worker_pid: i64) -> CoreResult<Option<JobRecord>> {
        let candidate = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM processing_jobs
            WHERE (status = 'pending' OR (status = 'failed' AND retry_count < max_retries))
              AND (
                media_file_id IS NULL
                OR media_file_id NOT IN (
                    SELECT media_file_id FROM processing_jobs
                    WHERE status = 'processing' AND media_file_id IS NOT NULL
                )
              )
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let now = now_iso8601();
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs SET
                status = 'processing',
                worker_pid = ?,
                started_at = COALESCE(started_at, ?)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(worker_pid)
        .bind(&now)
        .bind(candidate.id)
        .bind(&candidate.status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Someone else claimed it between our SELECT and UPDATE.
            return Ok(None);
        }

        self.get_by_id(candidate.id).await
    }

    /// Set `completed`, optionally recording the produced media file and
    /// output path in the same call.
    pub async fn complete(
        &self,
        job_id: i64,
        media_file_id: Option<i64>,
        output_path: Option<&str>,
    ) -> CoreResult<JobRecord> {
        if media_file_id.is_some() || output_path.is_some() {
            self.update(job_id, media_file_id, output_path).await?;
        }
        self.update_status(job_id, JobStatus::Completed, None).await
    }

    /// Set `failed`. If `retryable` and under the retry budget, increments
    /// `retry_count` so a future claim can re-run it. If not retryable,
    /// exhausts the retry budget outright (`retry_count = max_retries`) so
    /// `claim_next` never picks the row back up — a permanent failure
    /// must be final, not merely unincremented.
    pub async fn fail(&self, job_id: i64, error_message: &str, retryable: bool) -> CoreResult<JobRecord> {
        let record = self
            .update_status(job_id, JobStatus::Failed, Some(error_message))
            .await?;

        let record = if retryable && record.retry_count < record.max_retries {
            sqlx::query_as::<_, JobRecord>(
                "UPDATE processing_jobs SET retry_count = retry_count + 1 WHERE id = ? RETURNING *",
            )
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?
        } else if !retryable && record.retry_count < record.max_retries {
            sqlx::query_as::<_, JobRecord>(
                "UPDATE processing_jobs SET retry_count = max_retries WHERE id = ? RETURNING *",
            )
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?
        } else {
            record
        };

        Ok(record)
    }

    pub async fn get_jobs_by_status(&self, status: JobStatus) -> CoreResult<Vec<JobRecord>> {
        let records = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM processing_jobs WHERE status = ? ORDER BY id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Jobs recorded `processing`, used by stuck-job detection sweeps.
    pub async fn get_processing_jobs(&self) -> CoreResult<Vec<JobRecord>> {
        self.get_jobs_by_status(JobStatus::Processing).await
    }

    pub async fn get_job_statistics(&self) -> CoreResult<QueueStatus> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'failed' AND retry_count < max_retries THEN 1 ELSE 0 END)
            FROM processing_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStatus {
            pending: row.0,
            processing: row.1,
            completed: row.2,
            failed: row.3,
            retrying: row.4,
        })
    }
}

/// Snapshot of queue depth by status (spec §4.3 `get_queue_status`).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub retrying: i64,
}
