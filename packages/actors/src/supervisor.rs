//! Supervisor actor owning a pool of workers for one queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use db::JobQueue;
use futures_util::future::join_all;
use queue_core::JobEvent;
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::executor::Executor;
use crate::handler::JobHandlerRegistry;
use crate::messages::{SupervisorMessage, WorkerMessage};
use crate::worker::{Worker, WorkerConfig};
use crate::worker_actor::{WorkerActor, WorkerArgs, WorkerStats};

/// How long the supervisor waits for a busy worker to report its stats.
const STATS_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub queue: JobQueue,
    pub handlers: Arc<JobHandlerRegistry>,
    pub config: WorkerConfig,
    /// Number of workers to run.
    pub concurrency: usize,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    /// Live workers by actor ID.
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    queue: JobQueue,
    executor: Executor,
    config: WorkerConfig,
    concurrency: usize,
    event_tx: broadcast::Sender<JobEvent>,
    /// Set once shutdown starts; no restarts after that.
    draining: bool,
    /// Worker counter for unique IDs.
    worker_counter: u64,
}

impl SupervisorState {
    fn new(args: SupervisorArgs) -> Self {
        Self {
            workers: HashMap::new(),
            queue: args.queue,
            executor: Executor::new(args.handlers),
            config: args.config,
            concurrency: args.concurrency,
            event_tx: args.event_tx,
            draining: false,
            worker_counter: 0,
        }
    }

    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("worker-{}", self.worker_counter)
    }
}

async fn spawn_worker(
    supervisor: ActorCell,
    state: &mut SupervisorState,
    worker_id: String,
) -> Result<(), ActorProcessingErr> {
    let worker = Worker::new(
        worker_id.clone(),
        state.queue.clone(),
        state.executor.clone(),
        state.config.clone(),
    )
    .with_event_tx(state.event_tx.clone());

    let (actor, _handle) = Actor::spawn_linked(None, WorkerActor, WorkerArgs { worker }, supervisor)
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(actor.get_id(), (worker_id, actor));

    Ok(())
}

/// Supervisor actor that runs `concurrency` workers on one queue.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting supervisor for queue {} with {} workers",
            args.config.queue,
            args.concurrency
        );

        Ok(SupervisorState::new(args))
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for _ in 0..state.concurrency {
            let worker_id = state.next_worker_id();
            spawn_worker(myself.get_cell(), state, worker_id).await?;
        }

        if state.workers.is_empty() {
            tracing::warn!("Supervisor started with no workers");
            myself.stop(None);
        }

        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.draining = true;
                for (_, worker) in state.workers.values() {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                if state.workers.is_empty() {
                    myself.stop(None);
                }
            }

            SupervisorMessage::Stats { reply } => {
                let calls = state.workers.values().map(|(_, worker)| {
                    let cell = worker.get_cell();
                    async move {
                        ractor::rpc::call(
                            &cell,
                            |reply| WorkerMessage::Stats { reply },
                            Some(STATS_TIMEOUT),
                        )
                        .await
                    }
                });

                // Workers answer between iterations; ask them all at once
                let mut stats: Vec<WorkerStats> = join_all(calls)
                    .await
                    .into_iter()
                    .filter_map(|result| match result {
                        Ok(ractor::rpc::CallResult::Success(worker_stats)) => Some(worker_stats),
                        _ => None,
                    })
                    .collect();
                stats.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
                let _ = reply.send(stats);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) {
                    tracing::debug!("Worker {} terminated: {:?}", worker_id, reason);
                }
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                if let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) {
                    tracing::error!("Worker {} failed: {}", worker_id, error);
                    if !state.draining {
                        tracing::info!("Restarting worker {}", worker_id);
                        spawn_worker(myself.get_cell(), state, worker_id).await?;
                    }
                }
            }
            _ => {}
        }

        if state.workers.is_empty() {
            tracing::info!("All workers stopped");
            myself.stop(None);
        }

        Ok(())
    }
}

/// Start a supervisor and its workers.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(None, Supervisor, args).await?;

    Ok((actor, handle))
}
