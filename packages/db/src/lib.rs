//! SurrealDB integration for the job queue system.
//!
//! This crate provides database connectivity, the job and dead-letter
//! stores, and the [`JobQueue`] facade that workers and producers use.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a SurrealDB server over WebSocket

mod connection;
mod queue;
mod schema;
mod time;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use queue::JobQueue;
pub use schema::init_schema;

/// Connect with the given configuration and make sure the schema exists.
pub async fn init(config: DbConfig) -> Result<Database, DbError> {
    let db = connect(&config).await?;
    init_schema(&db).await?;
    Ok(db)
}
