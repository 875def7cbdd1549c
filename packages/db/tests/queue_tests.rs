#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::time::Duration as StdDuration;

use chrono::Duration;
use queue_core::{Clock, DEFAULT_QUEUE, FailureOutcome, JobPayload, QueueSettings, RetryPolicy};
use serde_json::json;

use db::DbError;

#[tokio::test]
async fn reserves_in_insertion_order() -> Result<(), Box<dyn Error>> {
    let (queue, _clock) = common::setup_queue().await?;

    let first = queue.push("echo", json!({"n": 1})).await?;
    let second = queue.push("echo", json!({"n": 2})).await?;
    let third = queue.push("echo", json!({"n": 3})).await?;
    assert!(first < second && second < third);

    let mut reserved = Vec::new();
    while let Some(job) = queue.reserve(DEFAULT_QUEUE).await? {
        reserved.push(job.id);
    }
    assert_eq!(reserved, vec![first, second, third]);

    Ok(())
}

#[tokio::test]
async fn queues_are_isolated() -> Result<(), Box<dyn Error>> {
    let (queue, _clock) = common::setup_queue().await?;

    queue
        .enqueue("echo", json!(null), "emails", StdDuration::ZERO)
        .await?;

    assert!(queue.reserve(DEFAULT_QUEUE).await?.is_none());
    let job = queue.reserve("emails").await?.ok_or("emails job missing")?;
    assert_eq!(job.queue, "emails");

    Ok(())
}

#[tokio::test]
async fn reservation_sets_lease_and_counts_attempt() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;

    let id = queue.push("echo", json!({"msg": "hi"})).await?;
    let stored = queue.jobs().get(id).await?;
    assert_eq!(stored.attempts, 0);
    assert!(stored.reserved_at.is_none());
    assert_eq!(stored.created_at, common::epoch());

    clock.advance(Duration::seconds(5));
    let job = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;
    assert_eq!(job.id, id);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.reserved_at, Some(common::epoch() + Duration::seconds(5)));

    let payload = job.decode_payload()?;
    assert_eq!(payload, JobPayload::new("echo", json!({"msg": "hi"})));

    // Leased jobs are invisible to other workers
    assert!(queue.reserve(DEFAULT_QUEUE).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn delayed_job_waits_until_available() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;

    let id = queue
        .later(StdDuration::from_secs(10), "echo", json!(null), DEFAULT_QUEUE)
        .await?;

    assert!(queue.reserve(DEFAULT_QUEUE).await?.is_none());
    assert_eq!(queue.size(DEFAULT_QUEUE).await?, 0);

    clock.advance(Duration::seconds(9));
    assert!(queue.reserve(DEFAULT_QUEUE).await?.is_none());

    clock.advance(Duration::seconds(1));
    assert_eq!(queue.size(DEFAULT_QUEUE).await?, 1);
    let job = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;
    assert_eq!(job.id, id);

    Ok(())
}

#[tokio::test]
async fn completed_job_is_deleted() -> Result<(), Box<dyn Error>> {
    let (queue, _clock) = common::setup_queue().await?;

    let id = queue.push("echo", json!(null)).await?;
    let job = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;
    queue.complete(&job).await?;

    assert!(matches!(queue.jobs().get(id).await, Err(DbError::NotFound(_))));
    assert!(matches!(
        queue.complete(&job).await,
        Err(DbError::LeaseLost(lost)) if lost == id
    ));

    Ok(())
}

#[tokio::test]
async fn stale_lease_is_reclaimed() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;

    let id = queue.push("echo", json!(null)).await?;
    let abandoned = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;

    // A lease exactly as old as the timeout still holds
    clock.advance(Duration::seconds(3600));
    assert!(queue.reserve(DEFAULT_QUEUE).await?.is_none());

    clock.advance(Duration::seconds(1));
    let reclaimed = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job not reclaimed")?;
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.attempts, 2);

    // The first worker's lease no longer owns the row
    assert!(matches!(
        queue.complete(&abandoned).await,
        Err(DbError::LeaseLost(_))
    ));
    assert!(matches!(
        queue.fail(&abandoned, "late", &RetryPolicy::default()).await,
        Err(DbError::LeaseLost(_))
    ));
    queue.complete(&reclaimed).await?;

    Ok(())
}

#[tokio::test]
async fn lease_timeout_is_configurable() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;
    let queue = queue.with_settings(QueueSettings::default().with_lease_timeout_secs(30));

    queue.push("echo", json!(null)).await?;
    queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;

    clock.advance(Duration::seconds(31));
    let job = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job not reclaimed")?;
    assert_eq!(job.attempts, 2);

    Ok(())
}

#[tokio::test]
async fn failures_back_off_exponentially() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;
    let policy = RetryPolicy::default();

    let id = queue.push("flaky", json!(null)).await?;

    let job = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;
    let outcome = queue.fail(&job, "boom", &policy).await?;
    let retry_at = common::epoch() + Duration::seconds(60);
    assert_eq!(outcome, FailureOutcome::Released { available_at: retry_at });

    let released = queue.jobs().get(id).await?;
    assert!(released.reserved_at.is_none());
    assert_eq!(released.attempts, 1);

    clock.advance(Duration::seconds(59));
    assert!(queue.reserve(DEFAULT_QUEUE).await?.is_none());

    clock.advance(Duration::seconds(1));
    let job = queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;
    assert_eq!(job.attempts, 2);

    let outcome = queue.fail(&job, "boom again", &policy).await?;
    assert_eq!(
        outcome,
        FailureOutcome::Released {
            available_at: retry_at + Duration::seconds(120)
        }
    );

    Ok(())
}

#[tokio::test]
async fn exhausted_job_is_dead_lettered() -> Result<(), Box<dyn Error>> {
    let (queue, clock) = common::setup_queue().await?;
    let policy = RetryPolicy::new(3, 1);

    let id = queue
        .enqueue("doomed", json!({"k": "v"}), "critical", StdDuration::ZERO)
        .await?;
    let raw_payload = queue.jobs().get(id).await?.payload;

    let mut last = None;
    for attempt in 1..=3 {
        clock.advance(Duration::hours(1));
        let job = queue.reserve("critical").await?.ok_or("job missing")?;
        assert_eq!(job.attempts, attempt);
        last = Some(queue.fail(&job, "permanent failure", &policy).await?);
    }

    let Some(FailureOutcome::DeadLettered { failed_id }) = last else {
        return Err(format!("expected dead-letter, got {:?}", last).into());
    };

    assert!(matches!(queue.jobs().get(id).await, Err(DbError::NotFound(_))));
    assert_eq!(queue.size("critical").await?, 0);

    let failed = queue.failed().get(failed_id).await?;
    assert_eq!(failed.job_id, id);
    assert_eq!(failed.queue, "critical");
    assert_eq!(failed.payload, raw_payload);
    assert_eq!(failed.exception, "permanent failure");
    assert_eq!(failed.failed_at, clock.now());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_reservations_never_share_a_job() -> Result<(), Box<dyn Error>> {
    let (queue, _clock) = common::setup_queue().await?;

    // The clock never moves, so no lease can expire and every job must be
    // handed out exactly once per round.
    for round in 0..20 {
        let mut pushed = HashSet::new();
        for n in 0..10 {
            pushed.insert(queue.push("echo", json!({ "round": round, "n": n })).await?);
        }

        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let queue = queue.clone();
            workers.spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = queue.reserve(DEFAULT_QUEUE).await? {
                    assert_eq!(job.attempts, 1);
                    claimed.push(job.id);
                }
                Ok::<_, DbError>(claimed)
            });
        }

        let mut seen = HashSet::new();
        while let Some(result) = workers.join_next().await {
            for id in result?? {
                assert!(seen.insert(id), "round {}: job {} reserved twice", round, id);
            }
        }
        assert_eq!(seen, pushed, "round {}", round);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn single_job_goes_to_exactly_one_worker() -> Result<(), Box<dyn Error>> {
    let (queue, _clock) = common::setup_queue().await?;

    for round in 0..20 {
        let id = queue.push("echo", json!({ "round": round })).await?;

        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let queue = queue.clone();
            workers.spawn(async move { queue.reserve(DEFAULT_QUEUE).await });
        }

        let mut winners = Vec::new();
        while let Some(result) = workers.join_next().await {
            if let Some(job) = result?? {
                winners.push(job.id);
            }
        }
        assert_eq!(winners, vec![id], "round {}", round);
    }

    Ok(())
}

#[tokio::test]
async fn size_and_clear_are_per_queue() -> Result<(), Box<dyn Error>> {
    let (queue, _clock) = common::setup_queue().await?;

    queue.push("echo", json!(null)).await?;
    queue.push("echo", json!(null)).await?;
    queue
        .enqueue("echo", json!(null), "other", StdDuration::ZERO)
        .await?;
    queue
        .later(StdDuration::from_secs(60), "echo", json!(null), DEFAULT_QUEUE)
        .await?;

    // Leased jobs still count
    queue.reserve(DEFAULT_QUEUE).await?.ok_or("job missing")?;
    assert_eq!(queue.size(DEFAULT_QUEUE).await?, 2);
    assert_eq!(queue.size("other").await?, 1);
    assert_eq!(queue.size("empty").await?, 0);

    assert_eq!(queue.clear(DEFAULT_QUEUE).await?, 3);
    assert!(queue.reserve(DEFAULT_QUEUE).await?.is_none());
    assert_eq!(queue.size("other").await?, 1);

    Ok(())
}
