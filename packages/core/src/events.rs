//! Event types for worker progress updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FailedJobId, JobId};

/// Events emitted by workers as they process a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A worker leased a job.
    JobReserved {
        job_id: JobId,
        queue: String,
        job_type: String,
        worker_id: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job completed and was removed from the store.
    JobCompleted {
        job_id: JobId,
        queue: String,
        worker_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job failed and was put back with a backoff.
    JobReleased {
        job_id: JobId,
        queue: String,
        error: String,
        attempts: u32,
        available_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// A job exhausted its attempts and moved to the dead-letter store.
    JobDeadLettered {
        job_id: JobId,
        failed_id: FailedJobId,
        queue: String,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker started polling a queue.
    WorkerStarted {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker left the polling loop.
    WorkerStopped {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobReserved { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobReleased { timestamp, .. } => *timestamp,
            JobEvent::JobDeadLettered { timestamp, .. } => *timestamp,
            JobEvent::WorkerStarted { timestamp, .. } => *timestamp,
            JobEvent::WorkerStopped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue name associated with this event.
    pub fn queue(&self) -> &str {
        match self {
            JobEvent::JobReserved { queue, .. } => queue,
            JobEvent::JobCompleted { queue, .. } => queue,
            JobEvent::JobReleased { queue, .. } => queue,
            JobEvent::JobDeadLettered { queue, .. } => queue,
            JobEvent::WorkerStarted { queue, .. } => queue,
            JobEvent::WorkerStopped { queue, .. } => queue,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobReserved { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::JobReleased { job_id, .. } => Some(*job_id),
            JobEvent::JobDeadLettered { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobReserved {
                job_id,
                job_type,
                worker_id,
                attempts,
                ..
            } => format!(
                "Job {} ({}) reserved by {} (attempt {})",
                job_id, job_type, worker_id, attempts
            ),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobReleased {
                job_id,
                error,
                available_at,
                ..
            } => format!(
                "Job {} failed: {} (retry at {})",
                job_id,
                error,
                available_at.to_rfc3339()
            ),
            JobEvent::JobDeadLettered {
                job_id,
                failed_id,
                error,
                ..
            } => format!("Job {} dead-lettered as {}: {}", job_id, failed_id, error),
            JobEvent::WorkerStarted {
                worker_id, queue, ..
            } => format!("Worker {} started on {}", worker_id, queue),
            JobEvent::WorkerStopped {
                worker_id, queue, ..
            } => format!("Worker {} stopped on {}", worker_id, queue),
        }
    }
}
