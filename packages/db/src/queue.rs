//! Queue facade: enqueueing, reservation and finalization of jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{
    Clock, DEFAULT_QUEUE, FailedJobId, FailureOutcome, Job, JobId, JobPayload, QueueSettings,
    RetryDecision, RetryPolicy, SystemClock,
};

use crate::repositories::{FailedJobRepository, JobRepository};
use crate::time;
use crate::{Database, DbError};

/// Entry point for producers and workers.
///
/// Holds no job state of its own; every call goes to the store.
#[derive(Clone)]
pub struct JobQueue {
    jobs: JobRepository,
    failed: FailedJobRepository,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
}

impl JobQueue {
    /// Create a queue over `db` using the wall clock and default settings.
    pub fn new(db: Database) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            failed: FailedJobRepository::new(db),
            clock: Arc::new(SystemClock),
            settings: QueueSettings::default(),
        }
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the queue settings.
    pub fn with_settings(mut self, settings: QueueSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Direct access to the job store.
    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    /// Direct access to the dead-letter store.
    pub fn failed(&self) -> &FailedJobRepository {
        &self.failed
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add a job of `job_type` to `queue`, reservable after `delay`.
    pub async fn enqueue(
        &self,
        job_type: &str,
        data: serde_json::Value,
        queue: &str,
        delay: Duration,
    ) -> Result<JobId, DbError> {
        let payload = JobPayload::new(job_type, data)
            .encode()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        let now = self.now();
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let available_at = time::add(now, delay);

        let id = self.jobs.insert(queue, &payload, available_at, now).await?;
        tracing::debug!("Enqueued job {} ({}) on {}", id, job_type, queue);

        Ok(id)
    }

    /// Add a job to the default queue with no delay.
    pub async fn push(&self, job_type: &str, data: serde_json::Value) -> Result<JobId, DbError> {
        self.enqueue(job_type, data, DEFAULT_QUEUE, Duration::ZERO).await
    }

    /// Add a job that becomes reservable after `delay`.
    pub async fn later(
        &self,
        delay: Duration,
        job_type: &str,
        data: serde_json::Value,
        queue: &str,
    ) -> Result<JobId, DbError> {
        self.enqueue(job_type, data, queue, delay).await
    }

    /// Lease the next eligible job of `queue`, if any.
    ///
    /// Leases older than the configured lease timeout are reclaimed.
    pub async fn reserve(&self, queue: &str) -> Result<Option<Job>, DbError> {
        let now = self.now();
        let stale_before = time::sub(now, self.settings.lease_timeout());

        let job = self.jobs.reserve(queue, now, stale_before).await?;
        if let Some(job) = &job {
            tracing::debug!("Reserved job {} on {} (attempt {})", job.id, queue, job.attempts);
        }

        Ok(job)
    }

    /// Finalize a successfully processed job by deleting it.
    ///
    /// Fails with [`DbError::LeaseLost`] when the row could not be deleted,
    /// so the job is never considered processed by mistake.
    pub async fn complete(&self, job: &Job) -> Result<(), DbError> {
        if self.jobs.delete(job.id, job.attempts).await? {
            Ok(())
        } else {
            Err(DbError::LeaseLost(job.id))
        }
    }

    /// Return a leased job to its queue, reservable again after `delay`.
    pub async fn release(&self, job: &Job, delay: chrono::Duration) -> Result<DateTime<Utc>, DbError> {
        let available_at = time::add(self.now(), delay);

        if self.jobs.release(job.id, job.attempts, available_at).await? {
            Ok(available_at)
        } else {
            Err(DbError::LeaseLost(job.id))
        }
    }

    /// Apply `policy` to a job whose attempt failed with `reason`.
    pub async fn fail(
        &self,
        job: &Job,
        reason: &str,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome, DbError> {
        match policy.decide(job.attempts) {
            RetryDecision::Release { delay } => {
                let available_at = self.release(job, delay).await?;
                Ok(FailureOutcome::Released { available_at })
            }
            RetryDecision::DeadLetter => {
                let failed_id = FailedJobId::new();
                if self.failed.bury(job, reason, failed_id, self.now()).await? {
                    tracing::warn!(
                        "Job {} moved to failed jobs as {} after {} attempts: {}",
                        job.id,
                        failed_id,
                        job.attempts,
                        reason
                    );
                    Ok(FailureOutcome::DeadLettered { failed_id })
                } else {
                    Err(DbError::LeaseLost(job.id))
                }
            }
        }
    }

    /// Number of jobs in `queue` whose `available_at` has passed.
    pub async fn size(&self, queue: &str) -> Result<u64, DbError> {
        self.jobs.size(queue, self.now()).await
    }

    /// Delete every job in `queue`.
    pub async fn clear(&self, queue: &str) -> Result<u64, DbError> {
        let cleared = self.jobs.clear(queue).await?;
        tracing::info!("Cleared {} jobs from {}", cleared, queue);
        Ok(cleared)
    }

    /// Put a dead-lettered job back on its original queue as a new job.
    ///
    /// The new job is inserted before the failed record is removed, so a
    /// crash in between leaves a duplicate rather than losing the job.
    pub async fn retry_failed(&self, id: FailedJobId) -> Result<JobId, DbError> {
        let failed = self.failed.get(id).await?;
        let now = self.now();

        let job_id = self
            .jobs
            .insert(&failed.queue, &failed.payload, now, now)
            .await?;
        self.failed.forget(id).await?;

        tracing::info!("Failed job {} re-queued on {} as job {}", id, failed.queue, job_id);

        Ok(job_id)
    }
}
