//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Data handed to a handler: the `data` part of the job payload.
pub type JobData = serde_json::Value;

/// Reason a handler gave up on a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct JobFailure(String);

impl JobFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobFailure {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for JobFailure {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<serde_json::Error> for JobFailure {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("Invalid job data: {}", e))
    }
}

/// Result type for job handlers.
pub type HandlerResult = Result<(), JobFailure>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
/// Only [`JobHandler::job_type`] and [`JobHandler::handle`] are required; the
/// other hooks let a job type override worker defaults.
pub trait JobHandler: Send + Sync + 'static {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Process the job data.
    fn handle(&self, data: JobData) -> HandlerFuture;

    /// Attempts allowed for this job type, overriding the worker's `tries`.
    fn max_attempts(&self) -> Option<u32> {
        None
    }

    /// Expected upper bound on a run. Advisory: overruns are logged, never
    /// interrupted.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Called once when a job of this type is moved to the failed jobs.
    fn failed(&self, _data: &JobData, _reason: &str) {}
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch. Built once at
/// startup and shared read-only by every worker.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let job_type = handler.job_type().to_string();
        if self.handlers.insert(job_type.clone(), Arc::new(handler)).is_some() {
            tracing::warn!("Replaced handler for job type: {}", job_type);
        }
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// List all registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }
}

type FailedHook = Box<dyn Fn(&JobData, &str) + Send + Sync>;

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(JobData) -> HandlerFuture + Send + Sync + 'static,
{
    job_type: String,
    handler: F,
    max_attempts: Option<u32>,
    timeout: Option<Duration>,
    on_failed: Option<FailedHook>,
}

impl<F> FnHandler<F>
where
    F: Fn(JobData) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
            max_attempts: None,
            timeout: None,
            on_failed: None,
        }
    }

    /// Override the number of attempts for this job type.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the advisory timeout for this job type.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `hook` when a job of this type is moved to the failed jobs.
    pub fn on_failed(mut self, hook: impl Fn(&JobData, &str) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Box::new(hook));
        self
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(JobData) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn handle(&self, data: JobData) -> HandlerFuture {
        (self.handler)(data)
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn failed(&self, data: &JobData, reason: &str) {
        if let Some(hook) = &self.on_failed {
            hook(data, reason);
        }
    }
}

/// Helper macro for creating job handlers from async closures.
///
/// ```ignore
/// let handler = job_handler!("echo", |data| {
///     tracing::info!("echo: {}", data);
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! job_handler {
    ($job_type:expr, |$data:ident| $body:expr) => {
        $crate::FnHandler::new($job_type, |$data: $crate::JobData| {
            Box::pin(async move { $body }) as $crate::HandlerFuture
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_dispatches_by_job_type() {
        let mut registry = JobHandlerRegistry::new();
        registry.register(crate::job_handler!("ok", |_data| Ok(())));
        registry.register(crate::job_handler!("needs_name", |data| {
            let name = data["name"].as_str().ok_or("missing name")?;
            if name.is_empty() {
                return Err(JobFailure::new("empty name"));
            }
            Ok(())
        }));

        assert_eq!(registry.job_types(), vec!["needs_name", "ok"]);
        assert!(registry.get("ok").is_some());
        assert!(registry.get("missing").is_none());

        let handler = registry.get("needs_name").unwrap();
        assert!(handler.handle(json!({"name": "ada"})).await.is_ok());
        assert_eq!(
            handler.handle(json!({})).await,
            Err(JobFailure::new("missing name"))
        );
    }

    #[test]
    fn fn_handler_hooks_default_to_none() {
        let plain = crate::job_handler!("plain", |_data| Ok(()));
        assert_eq!(plain.max_attempts(), None);
        assert_eq!(plain.timeout(), None);

        let tuned = crate::job_handler!("tuned", |_data| Ok(()))
            .with_max_attempts(5)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(tuned.max_attempts(), Some(5));
        assert_eq!(tuned.timeout(), Some(Duration::from_secs(2)));
    }
}
