//! Job domain types for work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Store-assigned job identifier.
///
/// Ids are handed out by the backing store in insertion order, so they
/// double as the FIFO tie-breaker within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.parse()?))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a dead-lettered job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailedJobId(pub Ulid);

impl FailedJobId {
    /// Create a new unique failed job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a failed job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for FailedJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FailedJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while encoding or decoding a job payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decoded job payload: the handler tag plus the data handed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Job type tag used to resolve the handler.
    #[serde(rename = "job")]
    pub job_type: String,
    /// Handler input.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl JobPayload {
    pub fn new(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            data,
        }
    }

    /// Serialize into the opaque string form kept by the store.
    pub fn encode(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the stored string form.
    pub fn decode(raw: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A job as held in the job table.
///
/// Instances are snapshots: they are read from the store for a single
/// polling cycle and never cached across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Logical queue this job belongs to.
    pub queue: String,
    /// Encoded [`JobPayload`]. Kept opaque so a malformed payload is a job
    /// failure rather than a storage failure.
    pub payload: String,
    /// Number of reservations made so far.
    pub attempts: u32,
    /// Earliest time the job may be reserved.
    pub available_at: DateTime<Utc>,
    /// Start of the current lease, if any.
    pub reserved_at: Option<DateTime<Utc>>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Decode the payload into its type tag and data.
    pub fn decode_payload(&self) -> Result<JobPayload, PayloadError> {
        JobPayload::decode(&self.payload)
    }

    /// Type tag for logging, falling back to a placeholder for unreadable payloads.
    pub fn type_label(&self) -> String {
        self.decode_payload()
            .map(|p| p.job_type)
            .unwrap_or_else(|_| "<malformed>".to_string())
    }
}

/// Snapshot of a job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: FailedJobId,
    /// Id the job had in the job table.
    pub job_id: JobId,
    pub queue: String,
    /// Payload exactly as it was stored.
    pub payload: String,
    /// Reason reported by the last failed attempt.
    pub exception: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedJob {
    /// Decode the payload into its type tag and data.
    pub fn decode_payload(&self) -> Result<JobPayload, PayloadError> {
        JobPayload::decode(&self.payload)
    }
}
