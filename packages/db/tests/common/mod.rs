use std::sync::Arc;

use chrono::{DateTime, Utc};
use queue_core::ManualClock;

use db::{Database, DbConfig, DbError, JobQueue};

/// Fixed start time so backoff and lease assertions are exact.
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default()
}

/// Open a private in-memory store with the schema applied.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(DbConfig::memory()).await
}

/// A queue over a fresh store, driven by a manual clock.
pub async fn setup_queue() -> Result<(JobQueue, Arc<ManualClock>), DbError> {
    let db = setup_db().await?;
    let clock = Arc::new(ManualClock::new(epoch()));
    let queue = JobQueue::new(db).with_clock(clock.clone());
    Ok((queue, clock))
}
