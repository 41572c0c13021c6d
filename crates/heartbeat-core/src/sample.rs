//! Typed heart-rate sample records.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One reading from one identity. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Reading value (beats per minute for heart-rate producers)
    pub value: f64,
    /// Producer key the sample was recorded under
    pub identity: String,
    /// Wall-clock instant the hub accepted the sample
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    #[must_use]
    pub fn new(identity: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            identity: identity.into(),
            timestamp,
        }
    }

    /// Timestamp as epoch milliseconds, the representation stores persist.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Rebuild a sample from its persisted columns.
    ///
    /// Returns `None` when the millisecond value is out of chrono's range.
    #[must_use]
    pub fn from_parts(identity: impl Into<String>, value: f64, timestamp_ms: i64) -> Option<Self> {
        let timestamp = Utc.timestamp_millis_opt(timestamp_ms).single()?;
        Some(Self::new(identity, value, timestamp))
    }
}
