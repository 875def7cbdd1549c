//! Database connection management.

use std::future::Future;
use std::time::Duration;

use queue_core::JobId;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use ulid::Ulid;

/// Database connection handle. Cheap to clone; clones share one connection.
pub type Database = Surreal<Any>;

/// How many times a transaction rejected for a concurrent write is re-run.
const TX_RETRY_LIMIT: u32 = 100;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection mode: "mem://", "rocksdb://path" or "ws://host:port"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "jobqueue".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for any endpoint understood by the `any` engine.
    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self::endpoint(format!("rocksdb://{}", path.into()))
    }

    /// Create a config for a shared SurrealDB server (requires remote feature).
    pub fn remote(address: impl Into<String>) -> Self {
        Self::endpoint(format!("ws://{}", address.into()))
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Lease lost for job {0}: it was finalized or re-reserved elsewhere")]
    LeaseLost(JobId),
    #[error("Write conflict: {0}")]
    Conflict(String),
}

impl DbError {
    /// Whether the engine rejected a transaction because of a concurrent
    /// write, in which case re-running it is safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Connection(e) => {
                let message = e.to_string();
                message.contains("can be retried") || message.contains("conflict")
            }
            DbError::Conflict(_) => true,
            _ => false,
        }
    }
}

/// Open a connection, authenticate and select the namespace and database.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(config.endpoint.as_str()).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root {
            username,
            password,
        })
        .await?;
    }

    // Select namespace and database
    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub(crate) async fn retry_conflicts<T, F, Fut>(mut op: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < TX_RETRY_LIMIT => {
                attempt += 1;
                tracing::debug!("Transaction conflict, retrying ({}/{}): {}", attempt, TX_RETRY_LIMIT, e);
                // Spread competing claimers apart
                let jitter = (Ulid::new().random() % 4) as u64;
                let backoff = u64::from(attempt.min(10)) * 2 + jitter;
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            result => return result,
        }
    }
}
