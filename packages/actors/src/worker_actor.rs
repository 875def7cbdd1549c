//! Worker actor driving the polling loop.

use queue_core::JobEvent;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::WorkerMessage;
use crate::worker::{JobOutcome, Processed, Worker};

/// Loop phase. A worker starts `Polling` and only ever moves to `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Polling,
    Draining,
}

/// Counters kept by each worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker_id: String,
    pub completed: u64,
    pub released: u64,
    pub dead_lettered: u64,
    pub lease_lost: u64,
    pub storage_errors: u64,
}

impl WorkerStats {
    fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    fn record(&mut self, processed: &Processed) {
        match processed.outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Released { .. } => self.released += 1,
            JobOutcome::DeadLettered { .. } => self.dead_lettered += 1,
            JobOutcome::LeaseLost => self.lease_lost += 1,
        }
    }

    /// Jobs this worker reserved and finished with, whatever the outcome.
    pub fn handled(&self) -> u64 {
        self.completed + self.released + self.dead_lettered + self.lease_lost
    }
}

/// State for the worker actor.
pub struct WorkerActorState {
    pub worker: Worker,
    pub phase: WorkerPhase,
    pub stats: WorkerStats,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker: Worker,
}

/// Worker actor: one sequential poll loop over a queue.
///
/// Each `Poll` message is one iteration. Because the actor handles one
/// message at a time, a `Shutdown` is only seen between iterations.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let worker = args.worker;
        tracing::info!(
            "Starting worker {} on queue {}",
            worker.id(),
            worker.config().queue
        );

        worker.emit(JobEvent::WorkerStarted {
            worker_id: worker.id().to_string(),
            queue: worker.config().queue.clone(),
            timestamp: chrono::Utc::now(),
        });

        // Kick off the loop
        myself.send_message(WorkerMessage::Poll)?;

        Ok(WorkerActorState {
            stats: WorkerStats::new(worker.id()),
            worker,
            phase: WorkerPhase::Polling,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let worker = &state.worker;
        tracing::info!("Worker {} stopped: {:?}", worker.id(), state.stats);

        worker.emit(JobEvent::WorkerStopped {
            worker_id: worker.id().to_string(),
            queue: worker.config().queue.clone(),
            timestamp: chrono::Utc::now(),
        });

        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.phase == WorkerPhase::Draining {
                    myself.stop(None);
                    return Ok(());
                }

                let sleep = state.worker.config().sleep;
                match state.worker.work_once().await {
                    Ok(Some(processed)) => {
                        state.stats.record(&processed);
                        // More work may be waiting; poll again right away
                        myself.send_message(WorkerMessage::Poll)?;
                    }
                    Ok(None) => {
                        myself.send_after(sleep, || WorkerMessage::Poll);
                    }
                    Err(e) => {
                        state.stats.storage_errors += 1;
                        tracing::error!(
                            "Worker {} could not poll, retrying in {:?}: {}",
                            state.worker.id(),
                            sleep,
                            e
                        );
                        myself.send_after(sleep, || WorkerMessage::Poll);
                    }
                }
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker.id());
                state.phase = WorkerPhase::Draining;
                myself.stop(None);
            }

            WorkerMessage::Stats { reply } => {
                let _ = reply.send(state.stats.clone());
            }
        }

        Ok(())
    }
}
