//! Demo job handlers registered by the `work` command.

use std::time::Duration;

use actors::{JobFailure, JobHandlerRegistry, job_handler};

/// Registry with the `echo`, `sleep` and `fail` demo handlers.
pub fn demo_registry() -> JobHandlerRegistry {
    let mut handlers = JobHandlerRegistry::new();

    // Logs its data
    handlers.register(job_handler!("echo", |data| {
        tracing::info!("Echo job: {}", data);
        Ok(())
    }));

    // Sleeps for `seconds` (default 5)
    handlers.register(
        job_handler!("sleep", |data| {
            let seconds = data.get("seconds").and_then(|v| v.as_u64()).unwrap_or(5);
            tracing::info!("Sleeping for {} seconds", seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            Ok(())
        })
        .with_timeout(Duration::from_secs(30)),
    );

    // Fails unless `fail` is false, for exercising retries
    handlers.register(
        job_handler!("fail", |data| {
            if data.get("fail").and_then(|v| v.as_bool()).unwrap_or(true) {
                return Err(JobFailure::new("Intentional failure"));
            }
            Ok(())
        })
        .on_failed(|data, reason| {
            tracing::warn!("fail job gave up ({}): {}", reason, data);
        }),
    );

    handlers
}
