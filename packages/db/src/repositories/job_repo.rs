//! Job record store.

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::take_last;
use crate::connection::retry_conflicts;
use crate::time::{from_millis, to_millis};
use crate::{Database, DbError};

/// Repository for the `job` table.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    seq: u64,
    queue: String,
    payload: String,
    attempts: u32,
    #[serde(default)]
    reserved_at: Option<i64>,
    available_at: i64,
    created_at: i64,
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Job {
            id: JobId(record.seq),
            queue: record.queue,
            payload: record.payload,
            attempts: record.attempts,
            available_at: from_millis(record.available_at),
            reserved_at: record.reserved_at.map(from_millis),
            created_at: from_millis(record.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Total {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct Seq {
    seq: u64,
}

/// Projection matching [`JobRecord`].
macro_rules! job_fields {
    () => {
        "seq, queue, payload, attempts, reserved_at, available_at, created_at"
    };
}

/// Bump the sequence and create the row in one transaction.
const INSERT_JOB: &str = r#"
BEGIN TRANSACTION;
LET $seq = (UPSERT job_sequence:job SET counter = (counter ?? 0) + 1 RETURN VALUE counter)[0];
CREATE type::thing("job", $seq) CONTENT {
    seq: $seq,
    queue: $queue,
    payload: $payload,
    attempts: 0,
    available_at: $available_at,
    created_at: $now
} RETURN VALUE seq;
COMMIT TRANSACTION;
"#;

/// Claim the oldest eligible job.
///
/// Every claim on a queue first writes that queue's `queue_lock` record, so
/// two overlapping claims always conflict on it and the engine aborts one of
/// them, whichever job each would pick. The claim also stamps a lease token
/// that the caller checks after commit.
const RESERVE_JOB: &str = concat!(
    r#"
BEGIN TRANSACTION;
UPSERT type::thing("queue_lock", $queue) SET claims = (claims ?? 0) + 1 RETURN NONE;
LET $candidate = (
    SELECT VALUE id FROM job
    WHERE queue = $queue
        AND available_at <= $now
        AND (reserved_at IS NONE OR reserved_at < $stale_before)
    ORDER BY id ASC
    LIMIT 1
);
UPDATE $candidate
    SET reserved_at = $now, attempts += 1, lease = $lease
    WHERE available_at <= $now
        AND (reserved_at IS NONE OR reserved_at < $stale_before)
    RETURN "#,
    job_fields!(),
    r#";
COMMIT TRANSACTION;
"#
);

/// Confirm after commit that the row still carries our lease.
const CONFIRM_LEASE: &str = r#"
SELECT VALUE seq FROM type::thing("job", $id) WHERE lease = $lease AND attempts = $attempts
"#;

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new pending job and return its store-assigned id.
    pub async fn insert(
        &self,
        queue: &str,
        payload: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<JobId, DbError> {
        retry_conflicts(move || self.try_insert(queue, payload, available_at, now)).await
    }

    async fn try_insert(
        &self,
        queue: &str,
        payload: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<JobId, DbError> {
        let response = self
            .db
            .query(INSERT_JOB)
            .bind(("queue", queue.to_string()))
            .bind(("payload", payload.to_string()))
            .bind(("available_at", to_millis(available_at)))
            .bind(("now", to_millis(now)))
            .await?
            .check()?;

        let ids: Vec<u64> = take_last(response)?;

        ids.into_iter()
            .next()
            .map(JobId)
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Atomically lease the oldest eligible job of `queue`.
    ///
    /// A job is eligible when `available_at <= now` and it is either unleased
    /// or its lease started before `stale_before`. The lease sets
    /// `reserved_at = now` and increments `attempts`.
    pub async fn reserve(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Job>, DbError> {
        retry_conflicts(move || self.try_reserve(queue, now, stale_before)).await
    }

    async fn try_reserve(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Job>, DbError> {
        let lease = Ulid::new().to_string();
        let response = self
            .db
            .query(RESERVE_JOB)
            .bind(("queue", queue.to_string()))
            .bind(("now", to_millis(now)))
            .bind(("stale_before", to_millis(stale_before)))
            .bind(("lease", lease.clone()))
            .await?
            .check()?;

        let records: Vec<JobRecord> = take_last(response)?;
        let Some(job) = records.into_iter().next().map(Job::from) else {
            return Ok(None);
        };

        let mut confirmed = self
            .db
            .query(CONFIRM_LEASE)
            .bind(("id", job.id.0 as i64))
            .bind(("lease", lease))
            .bind(("attempts", i64::from(job.attempts)))
            .await?;
        let owned: Vec<u64> = confirmed.take(0)?;
        if owned.is_empty() {
            return Err(DbError::Conflict(format!("job {} was claimed concurrently", job.id)));
        }

        Ok(Some(job))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let mut result = self
            .db
            .query(concat!(
                "SELECT ",
                job_fields!(),
                r#" FROM type::thing("job", $id)"#
            ))
            .bind(("id", id.0 as i64))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        records
            .into_iter()
            .next()
            .map(Job::from)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Delete a job, provided it still carries the lease seen at reservation.
    ///
    /// Returns `false` when the row is gone or was reserved again after the
    /// caller's lease expired.
    pub async fn delete(&self, id: JobId, attempts: u32) -> Result<bool, DbError> {
        retry_conflicts(move || async move {
            let mut result = self
                .db
                .query(r#"DELETE type::thing("job", $id) WHERE attempts = $attempts RETURN BEFORE"#)
                .bind(("id", id.0 as i64))
                .bind(("attempts", i64::from(attempts)))
                .await?;

            let deleted: Vec<Seq> = result.take(0)?;
            Ok(deleted.iter().any(|row| row.seq == id.0))
        })
        .await
    }

    /// Clear the lease and push `available_at` out, fenced like [`Self::delete`].
    pub async fn release(
        &self,
        id: JobId,
        attempts: u32,
        available_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        retry_conflicts(move || async move {
            let mut result = self
                .db
                .query(
                    r#"
                    UPDATE type::thing("job", $id)
                    SET reserved_at = NONE, lease = NONE, available_at = $available_at
                    WHERE attempts = $attempts
                    RETURN VALUE seq
                    "#,
                )
                .bind(("id", id.0 as i64))
                .bind(("attempts", i64::from(attempts)))
                .bind(("available_at", to_millis(available_at)))
                .await?;

            let updated: Vec<u64> = result.take(0)?;
            Ok(!updated.is_empty())
        })
        .await
    }

    /// Count jobs of `queue` whose `available_at` has passed, leased or not.
    pub async fn size(&self, queue: &str, now: DateTime<Utc>) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT count() AS total FROM job
                WHERE queue = $queue AND available_at <= $now
                GROUP ALL
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("now", to_millis(now)))
            .await?;

        let totals: Vec<Total> = result.take(0)?;

        Ok(totals.first().map_or(0, |t| t.total))
    }

    /// Delete every job of `queue`, including leased ones.
    pub async fn clear(&self, queue: &str) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("DELETE job WHERE queue = $queue RETURN BEFORE")
            .bind(("queue", queue.to_string()))
            .await?;

        let deleted: Vec<Seq> = result.take(0)?;

        Ok(deleted.len() as u64)
    }
}
