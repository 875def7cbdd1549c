//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Safe to run on
/// every startup.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // Job table and its id sequence
    db.query(JOB_SCHEMA).await?.check()?;

    // Dead-letter table
    db.query(FAILED_JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema. Records are keyed `job:<seq>`.
const JOB_SCHEMA: &str = r#"
-- Pending and in-flight jobs
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS seq ON job TYPE int;
DEFINE FIELD IF NOT EXISTS queue ON job TYPE string;
DEFINE FIELD IF NOT EXISTS payload ON job TYPE string;
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS reserved_at ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS lease ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS available_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE int;

-- Indexes for the reservation scan
DEFINE INDEX IF NOT EXISTS job_queue ON job FIELDS queue;
DEFINE INDEX IF NOT EXISTS job_available_at ON job FIELDS available_at;
DEFINE INDEX IF NOT EXISTS job_reserved_at ON job FIELDS reserved_at;

-- Monotonic id source, single record job_sequence:job
DEFINE TABLE IF NOT EXISTS job_sequence SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS counter ON job_sequence TYPE int DEFAULT 0;

-- One record per queue, written by every claim so concurrent claims conflict
DEFINE TABLE IF NOT EXISTS queue_lock SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS claims ON queue_lock TYPE int DEFAULT 0;
"#;

/// Dead-letter table schema. Records are keyed `failed_job:<ulid>`.
const FAILED_JOB_SCHEMA: &str = r#"
-- Jobs that exhausted their attempts
DEFINE TABLE IF NOT EXISTS failed_job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS uid ON failed_job TYPE string;
DEFINE FIELD IF NOT EXISTS job_id ON failed_job TYPE int;
DEFINE FIELD IF NOT EXISTS queue ON failed_job TYPE string;
DEFINE FIELD IF NOT EXISTS payload ON failed_job TYPE string;
DEFINE FIELD IF NOT EXISTS exception ON failed_job TYPE string;
DEFINE FIELD IF NOT EXISTS failed_at ON failed_job TYPE int;

-- Indexes for inspection queries
DEFINE INDEX IF NOT EXISTS failed_job_queue ON failed_job FIELDS queue;
DEFINE INDEX IF NOT EXISTS failed_job_failed_at ON failed_job FIELDS failed_at;
"#;
