//! Timestamp-based fencing tokens.
//!
//! ISA and subscription rows use their `updated_at` column (microsecond
//! precision) as the version a client must echo back to mutate the row:
//! `UPDATE … WHERE id = ? AND updated_at = ?` enforces the optimistic
//! concurrency check in a single statement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DssError;

/// An entity version: the row's last-write timestamp truncated to
/// microseconds (what the datastore actually stores).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(DateTime<Utc>);

impl Version {
    pub fn from_timestamp(t: DateTime<Utc>) -> Version {
        // Postgres TIMESTAMPTZ keeps microseconds; nanoseconds would make
        // the read-back token never match the stored one.
        let micros = t.timestamp_micros();
        Version(DateTime::<Utc>::from_timestamp_micros(micros).expect("timestamp in range"))
    }

    pub fn to_timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn matches(&self, other: &Version) -> bool {
        self == other
    }

    /// Parse a client-supplied version string (RFC 3339).
    pub fn parse(s: &str) -> Result<Version, DssError> {
        let t = DateTime::parse_from_rfc3339(s)
            .map_err(|e| DssError::BadRequest(format!("bad version: {e}")))?;
        Ok(Version::from_timestamp(t.with_timezone(&Utc)))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.6fZ"))
    }
}
