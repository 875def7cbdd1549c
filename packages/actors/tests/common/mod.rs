use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{Executor, JobFailure, JobHandlerRegistry, job_handler};
use chrono::{DateTime, Utc};
use queue_core::ManualClock;
use serde_json::Value;
use tokio::sync::Mutex;

use db::{Database, DbConfig, DbError, JobQueue};

/// Fixed start time so backoff assertions are exact.
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default()
}

/// A queue over a fresh in-memory store using the wall clock.
pub async fn setup_queue() -> Result<JobQueue, DbError> {
    Ok(setup_queue_with_db().await?.0)
}

/// Like [`setup_queue`], also handing back the store for direct queries.
pub async fn setup_queue_with_db() -> Result<(JobQueue, Database), DbError> {
    let db = db::init(DbConfig::memory()).await?;
    Ok((JobQueue::new(db.clone()), db))
}

/// A queue over a fresh in-memory store driven by a manual clock.
pub async fn setup_manual_queue() -> Result<(JobQueue, Arc<ManualClock>), DbError> {
    let clock = Arc::new(ManualClock::new(epoch()));
    let queue = setup_queue().await?.with_clock(clock.clone());
    Ok((queue, clock))
}

/// Handlers used across the worker tests, with hooks to observe them.
#[derive(Clone, Default)]
pub struct Probe {
    /// Data received by `record`.
    pub seen: Arc<Mutex<Vec<Value>>>,
    /// Invocations of the `fail` handler's failed hook.
    pub failed_hooks: Arc<AtomicUsize>,
}

impl Probe {
    /// Registry with `record` (stores its data), `fail` (always errors),
    /// `panic` (panics) and `slow` (sleeps `data.ms` milliseconds).
    pub fn registry(&self) -> JobHandlerRegistry {
        let mut registry = JobHandlerRegistry::new();

        let seen = self.seen.clone();
        registry.register(actors::FnHandler::new("record", move |data| {
            let seen = seen.clone();
            Box::pin(async move {
                seen.lock().await.push(data);
                Ok(())
            })
        }));

        let hooks = self.failed_hooks.clone();
        registry.register(
            job_handler!("fail", |_data| Err(JobFailure::new("always fails"))).on_failed(
                move |_data, _reason| {
                    hooks.fetch_add(1, Ordering::SeqCst);
                },
            ),
        );

        registry.register(job_handler!("panic", |data| {
            if !data["quiet"].as_bool().unwrap_or(false) {
                panic!("handler blew up");
            }
            Ok(())
        }));

        registry.register(job_handler!("slow", |data| {
            let ms = data["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        }));

        registry
    }

    pub fn executor(&self) -> Executor {
        Executor::new(Arc::new(self.registry()))
    }

    pub fn failed_hook_calls(&self) -> usize {
        self.failed_hooks.load(Ordering::SeqCst)
    }
}
