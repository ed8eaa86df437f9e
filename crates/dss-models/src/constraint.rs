//! Constraint references: restricted-airspace volumes published by
//! authorized USSs. Shaped like an operational intent minus the lifecycle
//! state and subscription coupling.

use chrono::{DateTime, Utc};
use dss_geo::CellUnion;
use uuid::Uuid;

use crate::{Owner, Ovn, Version, Volume4D};

#[derive(Debug, Clone)]
pub struct Constraint {
    pub id: Uuid,
    pub owner: Owner,
    pub url: String,
    pub cells: CellUnion,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub altitude_lower: Option<f64>,
    pub altitude_upper: Option<f64>,
    pub ovn: Ovn,
    pub version: i32,
    pub writer: Option<String>,
    pub updated_at: Option<Version>,
}

impl Constraint {
    pub fn extent(&self) -> Volume4D {
        Volume4D::from_cells(
            self.cells.clone(),
            self.starts_at,
            self.ends_at,
            self.altitude_lower,
            self.altitude_upper,
        )
    }

    pub fn redacted_for(mut self, reader: &Owner) -> Constraint {
        if &self.owner != reader {
            self.ovn = Ovn::empty();
        }
        self
    }
}
