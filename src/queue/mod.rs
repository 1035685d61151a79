//! Job Queue (spec §4.3): a thin, append-only protocol over the
//! `JobRepository`.

use serde_json::Value;

use crate::db::jobs::{CreateJob, JobRecord, JobStatus, QueueStatus};
use crate::db::Database;
use crate::error::CoreResult;

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The new row is `pending`, `retry_count = 0`.
    pub async fn enqueue(
        &self,
        job_type: &str,
        input_path: &str,
        output_path: Option<&str>,
        params: Value,
        max_retries: i64,
    ) -> CoreResult<JobRecord> {
        self.db
            .jobs()
            .create(CreateJob {
                media_file_id: None,
                job_type: job_type.to_string(),
                input_path: input_path.to_string(),
                output_path: output_path.map(str::to_string),
                parameters: params,
                max_retries,
            })
            .await
    }

    pub async fn claim_next(&self, worker_pid: i64) -> CoreResult<Option<JobRecord>> {
        self.db.jobs().claim_next(worker_pid).await
    }

    pub async fn complete(
        &self,
        job_id: i64,
        media_file_id: Option<i64>,
        output_path: Option<&str>,
    ) -> CoreResult<JobRecord> {
        self.db.jobs().complete(job_id, media_file_id, output_path).await
    }

    pub async fn fail(&self, job_id: i64, err_msg: &str, retryable: bool) -> CoreResult<JobRecord> {
        self.db.jobs().fail(job_id, err_msg, retryable).await
    }

    pub async fn get_jobs_by_status(&self, status: JobStatus) -> CoreResult<Vec<JobRecord>> {
        self.db.jobs().get_jobs_by_status(status).await
    }

    pub async fn get_queue_status(&self) -> CoreResult<QueueStatus> {
        self.db.jobs().get_job_statistics().await
    }
}
