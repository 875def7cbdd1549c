//! Message types for actor communication.

use ractor::RpcReplyPort;

use crate::worker_actor::WorkerStats;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one loop iteration.
    Poll,

    /// Finish the current iteration and stop.
    Shutdown,

    /// Get the worker's counters.
    Stats { reply: RpcReplyPort<WorkerStats> },
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Stop every worker, then the supervisor itself.
    Shutdown,

    /// Collect counters from all live workers.
    Stats {
        reply: RpcReplyPort<Vec<WorkerStats>>,
    },
}
