//! Identification Service Areas: time-bounded volumes during which a USS
//! can answer remote-ID queries for flights inside them.

use chrono::{DateTime, Utc};
use dss_geo::CellUnion;
use uuid::Uuid;

use crate::{DssError, Owner, Version, Volume4D};

#[derive(Debug, Clone)]
pub struct IdentificationServiceArea {
    pub id: Uuid,
    pub owner: Owner,
    /// USS callback serving flight details for this area.
    pub url: String,
    pub cells: CellUnion,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Locality tag of the DSS instance that last wrote the row.
    pub writer: Option<String>,
    /// Fencing token; `None` until the row has been persisted once.
    pub version: Option<Version>,
}

impl IdentificationServiceArea {
    /// The stored 4-D extent (ISAs carry no altitude band).
    pub fn extent(&self) -> Volume4D {
        Volume4D::from_cells(self.cells.clone(), self.starts_at, self.ends_at, None, None)
    }

    /// Validate and default the time range before a write.
    ///
    /// A missing start means "now"; an end in the past or a reversed range
    /// is a bad request.
    pub fn adjust_time_range(&mut self, now: DateTime<Utc>) -> Result<(), DssError> {
        let starts = *self.starts_at.get_or_insert(now);

        let ends = self
            .ends_at
            .ok_or_else(|| DssError::BadRequest("missing required time_end".to_string()))?;
        if ends < now {
            return Err(DssError::BadRequest("time_end is in the past".to_string()));
        }
        if ends <= starts {
            return Err(DssError::BadRequest(
                "time_end must be after time_start".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use dss_geo::{CellId, LatLng};

    fn isa_at(starts: Option<DateTime<Utc>>, ends: Option<DateTime<Utc>>) -> IdentificationServiceArea {
        IdentificationServiceArea {
            id: Uuid::new_v4(),
            owner: Owner::from("uss1"),
            url: "https://uss1.example.com".to_string(),
            cells: CellUnion::new(vec![CellId::from_lat_lng_at_level(
                LatLng::new(37.0, -122.0),
                13,
            )]),
            starts_at: starts,
            ends_at: ends,
            writer: None,
            version: None,
        }
    }

    #[test]
    fn missing_start_defaults_to_now() {
        let now = Utc::now();
        let mut isa = isa_at(None, Some(now + TimeDelta::hours(1)));
        isa.adjust_time_range(now).unwrap();
        assert_eq!(isa.starts_at, Some(now));
    }

    #[test]
    fn past_end_rejected() {
        let now = Utc::now();
        let mut isa = isa_at(None, Some(now - TimeDelta::hours(1)));
        assert!(isa.adjust_time_range(now).is_err());
    }

    #[test]
    fn reversed_range_rejected() {
        let now = Utc::now();
        let mut isa = isa_at(
            Some(now + TimeDelta::hours(2)),
            Some(now + TimeDelta::hours(1)),
        );
        assert!(isa.adjust_time_range(now).is_err());
    }
}
