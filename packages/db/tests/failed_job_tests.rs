#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration as StdDuration;

use chrono::Duration;
use queue_core::{Clock, DEFAULT_QUEUE, FailedJobId, FailureOutcome, ManualClock, RetryPolicy};
use serde_json::json;

use db::{DbError, JobQueue};

/// Push a job to `queue` and fail it once under a single-attempt policy.
async fn dead_letter(
    queue: &JobQueue,
    clock: &ManualClock,
    name: &str,
    reason: &str,
) -> Result<FailedJobId, Box<dyn Error>> {
    queue
        .enqueue("report", json!({"queue": name}), name, StdDuration::ZERO)
        .await?;
    let job = queue.reserve(name).await?.ok_or("job missing")?;
    clock.advance(Duration::seconds(1));

    match queue.fail(&job, reason, &RetryPolicy::default().with_max_attempts(1)).await? {
        FailureOutcome::DeadLettered { failed_id } => Ok(failed_id),
        other => Err(format!("expected dead-letter, got {:?}", other).into()),
    }
}

#[tokio::test]
async fn lists_newest_first_with_filter_and_limit() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;

    let oldest = dead_letter(&queue, &clock, "alpha", "a1").await?;
    let middle = dead_letter(&queue, &clock, "beta", "b1").await?;
    let newest = dead_letter(&queue, &clock, "alpha", "a2").await?;

    let all = queue.failed().list(None, 10).await?;
    let ids: Vec<_> = all.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![newest, middle, oldest]);

    let alpha = queue.failed().list(Some("alpha"), 10).await?;
    assert_eq!(alpha.len(), 2);
    assert!(alpha.iter().all(|f| f.queue == "alpha"));

    let limited = queue.failed().list(None, 1).await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].exception, "a2");

    Ok(())
}

#[tokio::test]
async fn retry_requeues_payload_as_new_job() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;

    let failed_id = dead_letter(&queue, &clock, DEFAULT_QUEUE, "boom").await?;
    let failed = queue.failed().get(failed_id).await?;

    let job_id = queue.retry_failed(failed_id).await?;
    assert!(job_id > failed.job_id);

    let job = queue.jobs().get(job_id).await?;
    assert_eq!(job.payload, failed.payload);
    assert_eq!(job.queue, DEFAULT_QUEUE);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.available_at, clock.now());

    assert!(matches!(
        queue.failed().get(failed_id).await,
        Err(DbError::NotFound(_))
    ));
    assert!(matches!(
        queue.retry_failed(failed_id).await,
        Err(DbError::NotFound(_))
    ));

    let reserved = queue.reserve(DEFAULT_QUEUE).await?.ok_or("retried job missing")?;
    assert_eq!(reserved.id, job_id);
    assert_eq!(reserved.decode_payload()?.job_type, "report");

    Ok(())
}

#[tokio::test]
async fn forget_and_flush() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;

    let first = dead_letter(&queue, &clock, "alpha", "x").await?;
    dead_letter(&queue, &clock, "alpha", "y").await?;
    dead_letter(&queue, &clock, "beta", "z").await?;

    assert!(queue.failed().forget(first).await?);
    assert!(!queue.failed().forget(first).await?);

    assert_eq!(queue.failed().flush(Some("alpha")).await?, 1);
    assert_eq!(queue.failed().list(None, 10).await?.len(), 1);

    assert_eq!(queue.failed().flush(None).await?, 1);
    assert!(queue.failed().list(None, 10).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn bury_requires_current_lease() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;

    queue.push("report", json!(null)).await?;
    let stale = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;

    clock.advance(Duration::hours(2));
    let current = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job not reclaimed")?;

    let buried = queue
        .failed()
        .bury(&stale, "late", FailedJobId::new(), clock.now())
        .await?;
    assert!(!buried);
    assert!(queue.failed().list(None, 10).await?.is_empty());

    let buried = queue
        .failed()
        .bury(&current, "now", FailedJobId::new(), clock.now())
        .await?;
    assert!(buried);
    assert_eq!(queue.failed().list(None, 10).await?.len(), 1);
    assert_eq!(queue.size(DEFAULT_QUEUE).await?, 0);

    Ok(())
}
