//! Repository implementations for database operations.

mod failed_job_repo;
mod job_repo;

pub use failed_job_repo::FailedJobRepository;
pub use job_repo::JobRepository;

use serde::de::DeserializeOwned;
use surrealdb::Response;

use crate::DbError;

/// Take the result of the last statement of a multi-statement query.
///
/// `BEGIN`/`COMMIT` produce no result entries, so in a transaction block the
/// last entry belongs to the last real statement.
pub(crate) fn take_last<T: DeserializeOwned>(mut response: Response) -> Result<Vec<T>, DbError> {
    let last = response
        .num_statements()
        .checked_sub(1)
        .ok_or_else(|| DbError::Query("Query returned no results".into()))?;
    Ok(response.take(last)?)
}
