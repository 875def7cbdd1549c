//! Dead-letter store.

use chrono::{DateTime, Utc};
use queue_core::{FailedJob, FailedJobId, Job, JobId};
use serde::{Deserialize, Serialize};

use super::take_last;
use crate::connection::retry_conflicts;
use crate::time::{from_millis, to_millis};
use crate::{Database, DbError};

/// Repository for the `failed_job` table.
#[derive(Clone)]
pub struct FailedJobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct FailedJobRecord {
    uid: String,
    job_id: u64,
    queue: String,
    payload: String,
    exception: String,
    failed_at: i64,
}

impl TryFrom<FailedJobRecord> for FailedJob {
    type Error = DbError;

    fn try_from(record: FailedJobRecord) -> Result<Self, Self::Error> {
        let id = FailedJobId::parse(&record.uid)
            .map_err(|e| DbError::Serialization(format!("Bad failed job id {}: {}", record.uid, e)))?;

        Ok(FailedJob {
            id,
            job_id: JobId(record.job_id),
            queue: record.queue,
            payload: record.payload,
            exception: record.exception,
            failed_at: from_millis(record.failed_at),
        })
    }
}

/// Projection matching [`FailedJobRecord`].
macro_rules! failed_fields {
    () => {
        "uid, job_id, queue, payload, exception, failed_at"
    };
}

/// Move a leased job into the dead-letter table. The delete is fenced by
/// `attempts`; the failed record is built from the deleted row itself.
const BURY_JOB: &str = r#"
BEGIN TRANSACTION;
LET $gone = (DELETE type::thing("job", $job_id) WHERE attempts = $attempts RETURN BEFORE);
IF array::len($gone) > 0 {
    CREATE type::thing("failed_job", $uid) CONTENT {
        uid: $uid,
        job_id: $job_id,
        queue: $gone[0].queue,
        payload: $gone[0].payload,
        exception: $exception,
        failed_at: $now
    } RETURN NONE;
};
SELECT VALUE uid FROM type::thing("failed_job", $uid);
COMMIT TRANSACTION;
"#;

fn collect(records: Vec<FailedJobRecord>) -> Result<Vec<FailedJob>, DbError> {
    records.into_iter().map(FailedJob::try_from).collect()
}

impl FailedJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Delete `job` from the job table and record it as failed, atomically.
    ///
    /// Returns `false` (and writes nothing) when the job row is gone or
    /// was reserved again since `job` was read.
    pub async fn bury(
        &self,
        job: &Job,
        exception: &str,
        failed_id: FailedJobId,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        retry_conflicts(move || self.try_bury(job, exception, failed_id, now)).await
    }

    async fn try_bury(
        &self,
        job: &Job,
        exception: &str,
        failed_id: FailedJobId,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let response = self
            .db
            .query(BURY_JOB)
            .bind(("job_id", job.id.0 as i64))
            .bind(("attempts", i64::from(job.attempts)))
            .bind(("uid", failed_id.to_string()))
            .bind(("exception", exception.to_string()))
            .bind(("now", to_millis(now)))
            .await?
            .check()?;

        let created: Vec<String> = take_last(response)?;

        Ok(!created.is_empty())
    }

    /// Get a failed job by ID.
    pub async fn get(&self, id: FailedJobId) -> Result<FailedJob, DbError> {
        let mut result = self
            .db
            .query(concat!(
                "SELECT ",
                failed_fields!(),
                r#" FROM type::thing("failed_job", $uid)"#
            ))
            .bind(("uid", id.to_string()))
            .await?;

        let records: Vec<FailedJobRecord> = result.take(0)?;

        collect(records)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Failed job not found: {}", id)))
    }

    /// List failed jobs, newest first, optionally restricted to one queue.
    pub async fn list(&self, queue: Option<&str>, limit: usize) -> Result<Vec<FailedJob>, DbError> {
        let where_clause = if queue.is_some() {
            "WHERE queue = $queue"
        } else {
            ""
        };

        let query = format!(
            "SELECT {} FROM failed_job {} ORDER BY failed_at DESC, uid DESC LIMIT $limit",
            failed_fields!(),
            where_clause
        );

        let mut request = self.db.query(&query).bind(("limit", limit as i64));
        if let Some(queue) = queue {
            request = request.bind(("queue", queue.to_string()));
        }

        let mut response = request.await?;
        let records: Vec<FailedJobRecord> = response.take(0)?;

        collect(records)
    }

    /// Remove a failed job and return it.
    pub async fn take(&self, id: FailedJobId) -> Result<Option<FailedJob>, DbError> {
        let mut result = self
            .db
            .query(r#"DELETE type::thing("failed_job", $uid) RETURN BEFORE"#)
            .bind(("uid", id.to_string()))
            .await?;

        let records: Vec<FailedJobRecord> = result.take(0)?;

        Ok(collect(records)?.into_iter().next())
    }

    /// Delete a failed job. Returns whether it existed.
    pub async fn forget(&self, id: FailedJobId) -> Result<bool, DbError> {
        Ok(self.take(id).await?.is_some())
    }

    /// Delete all failed jobs, or only those of one queue.
    pub async fn flush(&self, queue: Option<&str>) -> Result<u64, DbError> {
        let request = match queue {
            Some(queue) => self
                .db
                .query("DELETE failed_job WHERE queue = $queue RETURN BEFORE")
                .bind(("queue", queue.to_string())),
            None => self.db.query("DELETE failed_job RETURN BEFORE"),
        };

        let deleted: Vec<FailedJobRecord> = request.await?.take(0)?;
        tracing::debug!("Flushed {} failed jobs", deleted.len());

        Ok(deleted.len() as u64)
    }
}
