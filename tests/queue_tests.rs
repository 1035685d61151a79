//! End-to-end coverage of the Job Queue (spec §4.3) against a real
//! in-memory ledger: enqueue, exclusive claim, completion, and the
//! failed-but-retryable reclaim path.

use serde_json::json;

use spatelier_core::db::jobs::JobStatus;
use spatelier_core::db::Database;
use spatelier_core::queue::JobQueue;

async fn memory_queue() -> JobQueue {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    JobQueue::new(db)
}

#[tokio::test]
async fn enqueue_claim_complete_round_trips() {
    let queue = memory_queue().await;
    let job = queue
        .enqueue("download_video", "https://example/v/X", None, json!({"url": "https://example/v/X"}), 3)
        .await
        .unwrap();
    assert_eq!(job.status, "pending");

    let claimed = queue.claim_next(42).await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, "processing");

    let completed = queue.complete(job.id, Some(7), Some("/data/out/x.mp4")).await.unwrap();
    assert_eq!(completed.status, "completed");
    assert_eq!(completed.media_file_id, Some(7));
    assert_eq!(completed.output_path.as_deref(), Some("/data/out/x.mp4"));
}

#[tokio::test]
async fn claim_next_never_hands_the_same_job_to_two_callers() {
    let queue = memory_queue().await;
    queue.enqueue("download_video", "https://example/v/X", None, json!({}), 3).await.unwrap();

    let first = queue.claim_next(1).await.unwrap();
    let second = queue.claim_next(2).await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
}

#[tokio::test]
async fn failed_retryable_job_is_reclaimable_until_budget_exhausted() {
    let queue = memory_queue().await;
    let job = queue.enqueue("download_video", "https://example/v/X", None, json!({}), 2).await.unwrap();

    queue.claim_next(1).await.unwrap();
    let failed = queue.fail(job.id, "connection reset", true).await.unwrap();
    assert_eq!(failed.retry_count, 1);

    // Retry budget not exhausted: claim_next picks the failed row back up.
    let reclaimed = queue.claim_next(2).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.status, "processing");

    let failed_again = queue.fail(job.id, "connection reset", true).await.unwrap();
    assert_eq!(failed_again.retry_count, 2);

    // Budget exhausted now: no further claim.
    assert!(queue.claim_next(3).await.unwrap().is_none());
}

#[tokio::test]
async fn permanent_failure_exhausts_retry_budget_immediately() {
    let queue = memory_queue().await;
    let job = queue.enqueue("download_video", "https://example/v/X", None, json!({}), 3).await.unwrap();
    queue.claim_next(1).await.unwrap();

    let failed = queue.fail(job.id, "unsupported format", false).await.unwrap();
    assert_eq!(failed.retry_count, failed.max_retries);
    assert!(queue.claim_next(2).await.unwrap().is_none());
}

#[tokio::test]
async fn queue_status_reflects_current_job_counts() {
    let queue = memory_queue().await;
    queue.enqueue("download_video", "https://example/v/A", None, json!({}), 3).await.unwrap();
    let b = queue.enqueue("download_video", "https://example/v/B", None, json!({}), 3).await.unwrap();
    queue.claim_next(1).await.unwrap();
    queue.fail(b.id, "boom", false).await.unwrap();

    let status = queue.get_queue_status().await.unwrap();
    assert_eq!(status.pending, 1);
    assert_eq!(status.failed, 1);
    assert_eq!(status.retrying, 0);

    let still_failed = queue.get_jobs_by_status(JobStatus::Failed).await.unwrap();
    assert_eq!(still_failed.len(), 1);
}
