//! Per-USS availability records, maintained by the arbitration role.
//!
//! A USS marked `Down` cannot move intents into Accepted or Activated; the
//! rest of the system reads these records, it never writes them.

use crate::{DssError, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityStatus {
    Unknown,
    Normal,
    Down,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Unknown => "Unknown",
            AvailabilityStatus::Normal => "Normal",
            AvailabilityStatus::Down => "Down",
        }
    }

    pub fn parse(s: &str) -> Result<AvailabilityStatus, DssError> {
        match s {
            "Unknown" => Ok(AvailabilityStatus::Unknown),
            "Normal" => Ok(AvailabilityStatus::Normal),
            "Down" => Ok(AvailabilityStatus::Down),
            other => Err(DssError::BadRequest(format!(
                "invalid availability state: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UssAvailability {
    pub uss_id: String,
    pub status: AvailabilityStatus,
    pub version: Option<Version>,
}

impl UssAvailability {
    /// The record returned for a USS nobody has arbitrated yet.
    pub fn unknown(uss_id: &str) -> UssAvailability {
        UssAvailability {
            uss_id: uss_id.to_string(),
            status: AvailabilityStatus::Unknown,
            version: None,
        }
    }
}
