//! Subscriptions: persistent interest registrations over a 4-D volume.
//!
//! A subscription's `notification_index` is bumped by exactly one, inside
//! the same transaction as the triggering mutation, for every entity change
//! overlapping its extent. Implicit subscriptions are created on behalf of
//! operational intents and follow their lifecycle.

use chrono::{DateTime, Utc};
use dss_geo::CellUnion;
use uuid::Uuid;

use crate::{DssError, Owner, Version, Volume4D};

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub owner: Owner,
    /// Base URL the owning USS receives notifications under.
    pub url: String,
    pub notification_index: i32,
    pub notify_for_operations: bool,
    pub notify_for_constraints: bool,
    /// Auto-created to satisfy an operational intent's coverage invariant;
    /// widened and garbage-collected with its intents.
    pub implicit: bool,
    pub cells: CellUnion,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub altitude_lo: Option<f64>,
    pub altitude_hi: Option<f64>,
    pub writer: Option<String>,
    pub version: Option<Version>,
}

impl Subscription {
    pub fn extent(&self) -> Volume4D {
        Volume4D::from_cells(
            self.cells.clone(),
            self.starts_at,
            self.ends_at,
            self.altitude_lo,
            self.altitude_hi,
        )
    }

    /// True when this subscription's extent contains `other` entirely:
    /// cells ⊇, time window ⊇, altitude band ⊇.
    pub fn contains_extent(&self, other: &Volume4D, cells: &CellUnion) -> bool {
        if !self.cells.contains(cells) {
            return false;
        }
        if let Some(start) = other.starts_at {
            match self.starts_at {
                Some(s) if s <= start => {}
                None => {}
                _ => return false,
            }
        }
        if let Some(end) = other.ends_at {
            match self.ends_at {
                Some(e) if e >= end => {}
                None => {}
                _ => return false,
            }
        }
        if let Some(lo) = other.altitude_lo {
            if let Some(s_lo) = self.altitude_lo {
                if s_lo > lo {
                    return false;
                }
            }
        }
        if let Some(hi) = other.altitude_hi {
            if let Some(s_hi) = self.altitude_hi {
                if s_hi < hi {
                    return false;
                }
            }
        }
        true
    }

    /// Grow this (implicit) subscription in place until it contains `vol`.
    pub fn widen_to(&mut self, vol: &Volume4D, cells: &CellUnion) {
        if !self.cells.contains(cells) {
            self.cells = self.cells.merged(cells);
        }
        if let Some(start) = vol.starts_at {
            if self.starts_at.map_or(true, |s| s > start) {
                self.starts_at = Some(start);
            }
        }
        if let Some(end) = vol.ends_at {
            if self.ends_at.map_or(true, |e| e < end) {
                self.ends_at = Some(end);
            }
        }
        if let Some(lo) = vol.altitude_lo {
            if self.altitude_lo.map_or(false, |s| s > lo) {
                self.altitude_lo = Some(lo);
            }
        }
        if let Some(hi) = vol.altitude_hi {
            if self.altitude_hi.map_or(false, |s| s < hi) {
                self.altitude_hi = Some(hi);
            }
        }
    }

    /// Validate and default the time range before a write, carrying fields
    /// forward from the stored row on update.
    pub fn adjust_time_range(
        &mut self,
        now: DateTime<Utc>,
        old: Option<&Subscription>,
    ) -> Result<(), DssError> {
        if self.starts_at.is_none() {
            self.starts_at = old.and_then(|o| o.starts_at).or(Some(now));
        }
        if self.ends_at.is_none() {
            self.ends_at = old.and_then(|o| o.ends_at);
        }

        let ends = self
            .ends_at
            .ok_or_else(|| DssError::BadRequest("missing required time_end".to_string()))?;
        if ends < now {
            return Err(DssError::BadRequest("time_end is in the past".to_string()));
        }
        if let Some(starts) = self.starts_at {
            if ends <= starts {
                return Err(DssError::BadRequest(
                    "time_end must be after time_start".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use dss_geo::{CellId, LatLng};

    fn cell(lat: f64, lng: f64) -> CellId {
        CellId::from_lat_lng_at_level(LatLng::new(lat, lng), 13)
    }

    fn sub() -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            owner: Owner::from("uss1"),
            url: "https://uss1.example.com".to_string(),
            notification_index: 0,
            notify_for_operations: true,
            notify_for_constraints: false,
            implicit: false,
            cells: CellUnion::new(vec![cell(37.0, -122.0), cell(37.01, -122.0)]),
            starts_at: Some(now),
            ends_at: Some(now + TimeDelta::hours(2)),
            altitude_lo: Some(0.0),
            altitude_hi: Some(500.0),
            writer: None,
            version: None,
        }
    }

    #[test]
    fn contains_extent_checks_all_dimensions() {
        let s = sub();
        let inner_cells = CellUnion::new(vec![cell(37.0, -122.0)]);
        let inner = Volume4D::from_cells(
            inner_cells.clone(),
            s.starts_at.map(|t| t + TimeDelta::minutes(10)),
            s.ends_at.map(|t| t - TimeDelta::minutes(10)),
            Some(100.0),
            Some(200.0),
        );
        assert!(s.contains_extent(&inner, &inner_cells));

        // time escapes the window
        let late = Volume4D {
            ends_at: s.ends_at.map(|t| t + TimeDelta::hours(1)),
            ..inner.clone()
        };
        assert!(!s.contains_extent(&late, &inner_cells));

        // altitude escapes the band
        let high = Volume4D {
            altitude_hi: Some(1000.0),
            ..inner.clone()
        };
        assert!(!s.contains_extent(&high, &inner_cells));

        // cells escape the union
        let outside = CellUnion::new(vec![cell(40.0, -100.0)]);
        assert!(!s.contains_extent(&inner, &outside));
    }

    #[test]
    fn widen_makes_containment_hold() {
        let mut s = sub();
        let far_cells = CellUnion::new(vec![cell(37.2, -122.2)]);
        let vol = Volume4D::from_cells(
            far_cells.clone(),
            s.starts_at.map(|t| t - TimeDelta::hours(1)),
            s.ends_at.map(|t| t + TimeDelta::hours(3)),
            Some(-50.0),
            Some(900.0),
        );
        assert!(!s.contains_extent(&vol, &far_cells));
        s.widen_to(&vol, &far_cells);
        assert!(s.contains_extent(&vol, &far_cells));
    }

    #[test]
    fn adjust_carries_old_end_forward() {
        let now = Utc::now();
        let old = sub();
        let mut update = Subscription {
            starts_at: None,
            ends_at: None,
            ..sub()
        };
        update.adjust_time_range(now, Some(&old)).unwrap();
        assert_eq!(update.ends_at, old.ends_at);
    }

    #[test]
    fn missing_end_with_no_old_row_rejected() {
        let mut s = Subscription {
            ends_at: None,
            ..sub()
        };
        assert!(s.adjust_time_range(Utc::now(), None).is_err());
    }
}
