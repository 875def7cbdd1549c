//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobPayload and FailedJob for work items
//! - RetryPolicy and QueueSettings for lease and retry behavior
//! - Clock for injectable time
//! - Events for worker progress

mod clock;
mod events;
mod job;
mod policy;
mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::JobEvent;
pub use job::{FailedJob, FailedJobId, Job, JobId, JobPayload, PayloadError};
pub use policy::{FailureOutcome, RetryDecision, RetryPolicy};
pub use queue::{DEFAULT_QUEUE, QueueSettings};
