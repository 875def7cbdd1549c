//! Command definitions and dispatch.

use std::sync::Arc;
use std::time::Duration;

use actors::{SupervisorArgs, SupervisorMessage, WorkerConfig, start_supervisor};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use db::{DbConfig, JobQueue};
use queue_core::{DEFAULT_QUEUE, FailedJobId, JobEvent, QueueSettings};
use tokio::sync::broadcast;

use crate::handlers::demo_registry;

/// Top-level CLI.
#[derive(Parser, Debug)]
#[command(name = "jobqueue")]
#[command(about = "Durable job queue backed by SurrealDB")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Where the job store lives.
#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Store endpoint: mem://, rocksdb://path or ws://host:port.
    #[arg(long = "db", env = "JOBQUEUE_DB", default_value = "mem://", global = true)]
    pub endpoint: String,

    /// SurrealDB namespace.
    #[arg(long, env = "JOBQUEUE_NAMESPACE", default_value = "jobqueue", global = true)]
    pub namespace: String,

    /// SurrealDB database.
    #[arg(long, env = "JOBQUEUE_DATABASE", default_value = "main", global = true)]
    pub database: String,

    /// Root username for remote stores.
    #[arg(long, env = "JOBQUEUE_USERNAME", global = true, requires = "password")]
    pub username: Option<String>,

    /// Root password for remote stores.
    #[arg(long, env = "JOBQUEUE_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,
}

impl StoreArgs {
    fn config(&self) -> DbConfig {
        let config = DbConfig::endpoint(&self.endpoint)
            .with_namespace(&self.namespace)
            .with_database(&self.database);

        match (&self.username, &self.password) {
            (Some(username), Some(password)) => config.with_credentials(username, password),
            _ => config,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process jobs from a queue until interrupted.
    Work(WorkArgs),

    /// Add a job to a queue.
    Push(PushArgs),

    /// Count the jobs of a queue that are due.
    Size(QueueArg),

    /// Delete every job of a queue.
    Clear(QueueArg),

    /// List failed jobs, newest first.
    Failed(FailedArgs),

    /// Put a failed job back on its queue.
    Retry(FailedIdArg),

    /// Delete a failed job.
    Forget(FailedIdArg),

    /// Delete all failed jobs, or those of one queue.
    Flush(FlushArgs),
}

#[derive(Args, Debug)]
pub struct WorkArgs {
    /// Queue to process.
    #[arg(long, default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Seconds to sleep when the queue is empty.
    #[arg(long, default_value = "3")]
    pub sleep: u64,

    /// Attempts before a job is moved to the failed jobs.
    #[arg(long, default_value = "3")]
    pub tries: u32,

    /// Seconds a job is expected to run; overruns are logged.
    #[arg(long, default_value = "60")]
    pub timeout: u64,

    /// Seconds after which an unfinished reservation is reclaimed.
    #[arg(long, default_value = "3600")]
    pub lease_timeout: u64,

    /// Seconds to wait after the first failure; doubles on each retry.
    #[arg(long, default_value = "60")]
    pub backoff: u64,

    /// Number of concurrent workers.
    #[arg(long, default_value = "1")]
    pub workers: usize,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Job type, e.g. echo, sleep or fail.
    pub job_type: String,

    /// Job data as JSON.
    #[arg(default_value = "null")]
    pub data: String,

    /// Target queue.
    #[arg(long, default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Seconds before the job becomes available.
    #[arg(long, default_value = "0")]
    pub delay: u64,
}

#[derive(Args, Debug)]
pub struct QueueArg {
    /// Queue name.
    #[arg(long, default_value = DEFAULT_QUEUE)]
    pub queue: String,
}

#[derive(Args, Debug)]
pub struct FailedArgs {
    /// Only show failed jobs of this queue.
    #[arg(long)]
    pub queue: Option<String>,

    /// Maximum number of entries.
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct FailedIdArg {
    /// Failed job ID as shown by `failed`.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct FlushArgs {
    /// Only flush failed jobs of this queue.
    #[arg(long)]
    pub queue: Option<String>,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

pub async fn run_with_cli(cli: Cli) -> Result<()> {
    let config = cli.store.config();
    if config.endpoint.starts_with("mem://") {
        tracing::warn!("{}", in_memory_warning(&cli.command));
    }

    let db = db::init(config)
        .await
        .context("Failed to open the job store")?;
    let queue = JobQueue::new(db);

    match cli.command {
        Commands::Work(args) => work(queue, args).await,
        Commands::Push(args) => push(&queue, args).await,
        Commands::Size(args) => {
            println!("{}", queue.size(&args.queue).await?);
            Ok(())
        }
        Commands::Clear(args) => {
            let cleared = queue.clear(&args.queue).await?;
            println!("Cleared {} jobs from [{}]", cleared, args.queue);
            Ok(())
        }
        Commands::Failed(args) => list_failed(&queue, args).await,
        Commands::Retry(args) => {
            let id = parse_failed_id(&args.id)?;
            let job_id = queue.retry_failed(id).await?;
            println!("Failed job {} pushed back as job {}", id, job_id);
            Ok(())
        }
        Commands::Forget(args) => {
            let id = parse_failed_id(&args.id)?;
            if queue.failed().forget(id).await? {
                println!("Failed job {} deleted", id);
            } else {
                println!("No failed job matches the given ID");
            }
            Ok(())
        }
        Commands::Flush(args) => {
            let flushed = queue.failed().flush(args.queue.as_deref()).await?;
            println!("Flushed {} failed jobs", flushed);
            Ok(())
        }
    }
}

/// What an operator loses by running `command` against `mem://`.
fn in_memory_warning(command: &Commands) -> &'static str {
    match command {
        Commands::Work(_) => {
            "Using an in-memory store; this worker only sees jobs pushed by itself. \
             Pass --db rocksdb://path or ws://host:port to share jobs with other processes"
        }
        _ => "Using an in-memory store; changes are lost when this command exits",
    }
}

fn parse_failed_id(raw: &str) -> Result<FailedJobId> {
    FailedJobId::parse(raw).with_context(|| format!("Invalid failed job ID: {}", raw))
}

async fn push(queue: &JobQueue, args: PushArgs) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(&args.data).context("Job data must be valid JSON")?;

    let id = queue
        .later(
            Duration::from_secs(args.delay),
            &args.job_type,
            data,
            &args.queue,
        )
        .await?;

    println!("Pushed job {} ({}) onto [{}]", id, args.job_type, args.queue);
    Ok(())
}

async fn list_failed(queue: &JobQueue, args: FailedArgs) -> Result<()> {
    let failed = queue.failed().list(args.queue.as_deref(), args.limit).await?;
    if failed.is_empty() {
        println!("No failed jobs");
        return Ok(());
    }

    for job in failed {
        let job_type = job
            .decode_payload()
            .map(|p| p.job_type)
            .unwrap_or_else(|_| "<malformed>".to_string());
        println!(
            "{}  {}  [{}]  {}  {}",
            job.id,
            job.failed_at.format("%Y-%m-%d %H:%M:%S"),
            job.queue,
            job_type,
            job.exception
        );
    }
    Ok(())
}

async fn work(queue: JobQueue, args: WorkArgs) -> Result<()> {
    let queue = queue.with_settings(QueueSettings::default().with_lease_timeout_secs(args.lease_timeout));
    let config = WorkerConfig::new(&args.queue)
        .with_sleep(Duration::from_secs(args.sleep))
        .with_tries(args.tries)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_backoff_secs(args.backoff);

    let handlers = demo_registry();
    println!(
        "Processing jobs from the [{}] queue with {} worker(s); handlers: {}",
        args.queue,
        args.workers,
        handlers.job_types().join(", ")
    );

    let (event_tx, events) = broadcast::channel(1024);
    let printer = tokio::spawn(print_events(events));

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        queue,
        handlers: Arc::new(handlers),
        config,
        concurrency: args.workers,
        event_tx,
    })
    .await
    .context("Failed to start workers")?;

    let mut handle = handle;
    tokio::select! {
        _ = shutdown_signal() => {
            println!("Shutting down after the current jobs finish...");
            supervisor
                .send_message(SupervisorMessage::Shutdown)
                .context("Supervisor is gone")?;
            (&mut handle).await.context("Supervisor task failed")?;
        }
        result = &mut handle => {
            result.context("Supervisor task failed")?;
            tracing::warn!("All workers stopped");
        }
    }

    printer.abort();
    Ok(())
}

/// Print one line per job event, the way an operator tails a worker.
async fn print_events(mut events: broadcast::Receiver<JobEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match &event {
                JobEvent::JobReserved { .. } | JobEvent::JobCompleted { .. } => {
                    println!("[{}] {}", event.timestamp().format("%Y-%m-%d %H:%M:%S"), event.description());
                }
                JobEvent::JobReleased { .. } | JobEvent::JobDeadLettered { .. } => {
                    eprintln!("[{}] {}", event.timestamp().format("%Y-%m-%d %H:%M:%S"), event.description());
                }
                _ => tracing::debug!("{}", event.description()),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} worker events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
