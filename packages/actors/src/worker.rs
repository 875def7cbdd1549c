//! One iteration of the worker loop: reserve, execute, finalize.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use db::{DbError, JobQueue};
use queue_core::{DEFAULT_QUEUE, FailedJobId, FailureOutcome, Job, JobEvent, JobId, RetryPolicy};
use tokio::sync::broadcast;

use crate::executor::{Execution, Executor};

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Queue to poll.
    pub queue: String,
    /// Pause between polls when the queue is empty.
    pub sleep: Duration,
    /// Attempts before a job is dead-lettered, unless its handler overrides it.
    pub tries: u32,
    /// Advisory run-time bound for handlers that declare none.
    pub timeout: Duration,
    /// Backoff after the first failure, in seconds.
    pub backoff_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            sleep: Duration::from_secs(3),
            tries: 3,
            timeout: Duration::from_secs(60),
            backoff_secs: 60,
        }
    }
}

impl WorkerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff_secs(mut self, backoff_secs: u64) -> Self {
        self.backoff_secs = backoff_secs;
        self
    }

    /// Retry policy applied to jobs whose handler has no override.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.tries, self.backoff_secs)
    }
}

/// Errors that interrupt the worker loop. Job failures are never among them.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

/// How a reserved job left the worker's hands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Released { available_at: DateTime<Utc> },
    DeadLettered { failed_id: FailedJobId },
    /// The lease expired and another worker reserved the job meanwhile.
    LeaseLost,
}

/// Summary of one productive iteration.
#[derive(Debug, Clone)]
pub struct Processed {
    pub job_id: JobId,
    pub job_type: String,
    pub attempts: u32,
    pub outcome: JobOutcome,
    pub duration: Duration,
}

/// Stateless worker: everything it knows about jobs comes from the store on
/// each iteration.
pub struct Worker {
    id: String,
    queue: JobQueue,
    executor: Executor,
    config: WorkerConfig,
    event_tx: Option<broadcast::Sender<JobEvent>>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: JobQueue,
        executor: Executor,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            executor,
            config,
            event_tx: None,
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Reserve and process at most one job. `None` means the queue had no
    /// eligible job.
    pub async fn work_once(&self) -> Result<Option<Processed>, WorkerError> {
        let Some(job) = self.queue.reserve(&self.config.queue).await? else {
            return Ok(None);
        };

        let job_type = job.type_label();
        tracing::info!("[{}] Processing: {} ({})", self.id, job_type, job.id);
        self.emit(JobEvent::JobReserved {
            job_id: job.id,
            queue: job.queue.clone(),
            job_type: job_type.clone(),
            worker_id: self.id.clone(),
            attempts: job.attempts,
            timestamp: self.queue.now(),
        });

        let started = Instant::now();
        let execution = self.executor.execute(&job, self.config.timeout).await;
        let duration = started.elapsed();

        let outcome = match execution {
            Execution::Succeeded => self.complete(&job, &job_type, duration).await?,
            Execution::Failed { reason } => self.fail(&job, &job_type, &reason).await?,
        };

        Ok(Some(Processed {
            job_id: job.id,
            job_type,
            attempts: job.attempts,
            outcome,
            duration,
        }))
    }

    async fn complete(
        &self,
        job: &Job,
        job_type: &str,
        duration: Duration,
    ) -> Result<JobOutcome, DbError> {
        match self.queue.complete(job).await {
            Ok(()) => {}
            Err(DbError::LeaseLost(id)) => return Ok(self.lease_lost(id)),
            Err(e) => return Err(e),
        }

        tracing::info!(
            "[{}] Processed:  {} ({}) in {}ms",
            self.id,
            job_type,
            job.id,
            duration.as_millis()
        );
        self.emit(JobEvent::JobCompleted {
            job_id: job.id,
            queue: job.queue.clone(),
            worker_id: self.id.clone(),
            duration_ms: duration.as_millis().try_into().unwrap_or(u64::MAX),
            timestamp: self.queue.now(),
        });

        Ok(JobOutcome::Completed)
    }

    async fn fail(&self, job: &Job, job_type: &str, reason: &str) -> Result<JobOutcome, DbError> {
        let policy = self.executor.policy_for(job, &self.config.retry_policy());

        let outcome = match self.queue.fail(job, reason, &policy).await {
            Ok(outcome) => outcome,
            Err(DbError::LeaseLost(id)) => return Ok(self.lease_lost(id)),
            Err(e) => return Err(e),
        };

        match outcome {
            FailureOutcome::Released { available_at } => {
                tracing::warn!(
                    "[{}] Released:   {} ({}) after attempt {}: {}",
                    self.id,
                    job_type,
                    job.id,
                    job.attempts,
                    reason
                );
                self.emit(JobEvent::JobReleased {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    error: reason.to_string(),
                    attempts: job.attempts,
                    available_at,
                    timestamp: self.queue.now(),
                });
                Ok(JobOutcome::Released { available_at })
            }
            FailureOutcome::DeadLettered { failed_id } => {
                tracing::error!("[{}] Failed:     {} ({}): {}", self.id, job_type, job.id, reason);
                self.executor.notify_failed(job, reason);
                self.emit(JobEvent::JobDeadLettered {
                    job_id: job.id,
                    failed_id,
                    queue: job.queue.clone(),
                    error: reason.to_string(),
                    attempts: job.attempts,
                    timestamp: self.queue.now(),
                });
                Ok(JobOutcome::DeadLettered { failed_id })
            }
        }
    }

    fn lease_lost(&self, id: JobId) -> JobOutcome {
        tracing::warn!(
            "[{}] Lease on job {} expired before it was finalized; left to its new owner",
            self.id,
            id
        );
        JobOutcome::LeaseLost
    }
}
