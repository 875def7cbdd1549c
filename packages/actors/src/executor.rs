//! Runs a reserved job through its registered handler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use queue_core::{Job, RetryPolicy};

use crate::handler::JobHandlerRegistry;

/// Result of one attempt at a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Succeeded,
    Failed { reason: String },
}

/// Resolves job types through a [`JobHandlerRegistry`] and runs the handler.
///
/// Every failure intrinsic to the job (malformed payload, unknown type,
/// handler error or panic) comes back as [`Execution::Failed`].
#[derive(Clone)]
pub struct Executor {
    registry: Arc<JobHandlerRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<JobHandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Run `job` to completion.
    ///
    /// `timeout_hint` applies when the handler declares no timeout of its
    /// own. Overruns are logged only.
    pub async fn execute(&self, job: &Job, timeout_hint: Duration) -> Execution {
        let payload = match job.decode_payload() {
            Ok(payload) => payload,
            Err(e) => {
                return Execution::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let Some(handler) = self.registry.get(&payload.job_type) else {
            return Execution::Failed {
                reason: format!("unknown job type: {}", payload.job_type),
            };
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(handler.handle(payload.data))
            .catch_unwind()
            .await;

        let limit = handler.timeout().unwrap_or(timeout_hint);
        let elapsed = started.elapsed();
        if elapsed > limit {
            tracing::warn!(
                "Job {} ({}) ran for {:?}, over its {:?} timeout",
                job.id,
                payload.job_type,
                elapsed,
                limit
            );
        }

        match result {
            Ok(Ok(())) => Execution::Succeeded,
            Ok(Err(failure)) => Execution::Failed {
                reason: failure.to_string(),
            },
            Err(panic) => Execution::Failed {
                reason: panic_message(panic.as_ref()),
            },
        }
    }

    /// `base` with the attempt limit replaced by the handler's own, if it has one.
    pub fn policy_for(&self, job: &Job, base: &RetryPolicy) -> RetryPolicy {
        job.decode_payload()
            .ok()
            .and_then(|payload| self.registry.get(&payload.job_type))
            .and_then(|handler| handler.max_attempts())
            .map_or(*base, |max| base.with_max_attempts(max))
    }

    /// Invoke the handler's `failed` hook for a dead-lettered job.
    pub fn notify_failed(&self, job: &Job, reason: &str) {
        let Ok(payload) = job.decode_payload() else {
            return;
        };
        if let Some(handler) = self.registry.get(&payload.job_type) {
            handler.failed(&payload.data, reason);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
