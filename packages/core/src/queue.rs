//! Queue-wide settings.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Queue name used when none is given.
pub const DEFAULT_QUEUE: &str = "default";

/// Configuration shared by every client of a job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Age after which an unfinished lease is considered abandoned and the
    /// job becomes reservable again. Unrelated to the worker's timeout hint.
    pub lease_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease_timeout_secs: 3600,
        }
    }
}

impl QueueSettings {
    /// Set the lease timeout.
    pub fn with_lease_timeout_secs(mut self, secs: u64) -> Self {
        self.lease_timeout_secs = secs;
        self
    }

    pub fn lease_timeout(&self) -> Duration {
        crate::policy::seconds(self.lease_timeout_secs)
    }
}
