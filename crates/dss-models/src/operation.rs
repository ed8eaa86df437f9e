//! Operational intent references: planned flights published for strategic
//! deconfliction. The DSS stores the reference (footprint, state, fencing
//! tokens); the flight plan itself stays on the owning USS.

use chrono::{DateTime, Utc};
use dss_geo::CellUnion;
use uuid::Uuid;

use crate::{DssError, Owner, Ovn, Version, Volume4D};

/// Lifecycle state of an operational intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentState {
    Accepted,
    Activated,
    Nonconforming,
    Contingent,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Accepted => "Accepted",
            IntentState::Activated => "Activated",
            IntentState::Nonconforming => "Nonconforming",
            IntentState::Contingent => "Contingent",
        }
    }

    pub fn parse(s: &str) -> Result<IntentState, DssError> {
        match s {
            "Accepted" => Ok(IntentState::Accepted),
            "Activated" => Ok(IntentState::Activated),
            "Nonconforming" => Ok(IntentState::Nonconforming),
            "Contingent" => Ok(IntentState::Contingent),
            other => Err(DssError::BadRequest(format!(
                "invalid operational intent state: {other}"
            ))),
        }
    }

    /// Whether moving from `from` (`None` = creation) to `to` is legal.
    ///
    /// Accepted ↔ Activated; either may degrade to Nonconforming or
    /// Contingent; a degraded intent only leaves its state by deletion.
    /// Same-state rewrites (extent changes) are always allowed.
    pub fn transition_allowed(from: Option<IntentState>, to: IntentState) -> bool {
        match from {
            None => to == IntentState::Accepted,
            Some(f) if f == to => true,
            Some(IntentState::Accepted) | Some(IntentState::Activated) => true,
            Some(IntentState::Nonconforming) | Some(IntentState::Contingent) => false,
        }
    }

    /// States that require the owning USS to be available.
    pub fn requires_availability(&self) -> bool {
        matches!(self, IntentState::Accepted | IntentState::Activated)
    }
}

#[derive(Debug, Clone)]
pub struct OperationalIntent {
    pub id: Uuid,
    pub owner: Owner,
    pub url: String,
    pub cells: CellUnion,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Meters above the WGS-84 ellipsoid.
    pub altitude_lower: Option<f64>,
    pub altitude_upper: Option<f64>,
    pub state: IntentState,
    pub ovn: Ovn,
    /// Monotonic write counter, starts at 1 on creation.
    pub version: i32,
    /// Every intent is covered by exactly one subscription.
    pub subscription_id: Uuid,
    pub writer: Option<String>,
    pub updated_at: Option<Version>,
}

impl OperationalIntent {
    pub fn extent(&self) -> Volume4D {
        Volume4D::from_cells(
            self.cells.clone(),
            self.starts_at,
            self.ends_at,
            self.altitude_lower,
            self.altitude_upper,
        )
    }

    /// Strip the OVN when handing the reference to a non-owner.
    pub fn redacted_for(mut self, reader: &Owner) -> OperationalIntent {
        if &self.owner != reader {
            self.ovn = Ovn::empty();
        }
        self
    }
}
