//! Worker side of the job queue.
//!
//! This crate provides the handler registry, the executor that runs a
//! reserved job, and the Ractor-based actors that poll a queue.
//!
//! # Architecture
//!
//! - `JobHandlerRegistry` - Maps job type tags to handlers
//! - `Executor` - Runs one job through its handler
//! - `Worker` - One reserve/execute/finalize iteration
//! - `WorkerActor` - Drives a worker's polling loop
//! - `Supervisor` - Runs and restarts a pool of worker actors
//!
//! # Usage
//!
//! ```ignore
//! use actors::{SupervisorArgs, SupervisorMessage, WorkerConfig, start_supervisor};
//!
//! let (supervisor, handle) = start_supervisor(SupervisorArgs {
//!     queue,
//!     handlers: Arc::new(registry),
//!     config: WorkerConfig::default(),
//!     concurrency: 4,
//!     event_tx,
//! })
//! .await?;
//!
//! supervisor.send_message(SupervisorMessage::Shutdown)?;
//! handle.await?;
//! ```

mod executor;
mod handler;
mod messages;
mod supervisor;
mod worker;
mod worker_actor;

pub use executor::{Execution, Executor};
pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobData, JobFailure, JobHandler, JobHandlerRegistry};
pub use messages::{SupervisorMessage, WorkerMessage};
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use worker::{JobOutcome, Processed, Worker, WorkerConfig, WorkerError};
pub use worker_actor::{WorkerActor, WorkerArgs, WorkerPhase, WorkerStats};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
