//! 4-D volumes: a spatial footprint extruded over an altitude band and a
//! time window. The common currency between requests, entities and the
//! overlap engine.

use chrono::{DateTime, Utc};
use dss_geo::{CellUnion, CoverConfig, Footprint};

use crate::DssError;

/// Where the spatial footprint of a volume comes from: request geometry not
/// yet covered, or cells already computed (stored entities, merged unions).
#[derive(Debug, Clone)]
pub enum FootprintSource {
    Geometry(Footprint),
    Cells(CellUnion),
}

/// A contiguous block of geographic spacetime.
#[derive(Debug, Clone, Default)]
pub struct Volume4D {
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Meters above the WGS-84 ellipsoid.
    pub altitude_lo: Option<f64>,
    pub altitude_hi: Option<f64>,
    pub footprint: Option<FootprintSource>,
}

impl Volume4D {
    /// A volume whose spatial part is an already-computed cover.
    pub fn from_cells(
        cells: CellUnion,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
        altitude_lo: Option<f64>,
        altitude_hi: Option<f64>,
    ) -> Volume4D {
        Volume4D {
            starts_at,
            ends_at,
            altitude_lo,
            altitude_hi,
            footprint: Some(FootprintSource::Cells(cells)),
        }
    }

    /// Compute (or fetch) the spatial cover of this volume.
    pub fn covering(&self, cfg: &CoverConfig) -> Result<CellUnion, DssError> {
        match &self.footprint {
            None => Err(DssError::BadRequest("missing spatial volume".to_string())),
            Some(FootprintSource::Cells(cells)) => Ok(cells.clone()),
            Some(FootprintSource::Geometry(fp)) => Ok(fp.covering(cfg)?),
        }
    }

    /// Union volumes into one that covers all of them in space and time:
    /// earliest start, latest end, widest altitude band, merged covers.
    pub fn union(volumes: &[Volume4D], cfg: &CoverConfig) -> Result<Volume4D, DssError> {
        let mut result = Volume4D::default();
        let mut cells = CellUnion::default();

        for v in volumes {
            if let Some(end) = v.ends_at {
                result.ends_at = Some(match result.ends_at {
                    Some(cur) if cur >= end => cur,
                    _ => end,
                });
            }
            if let Some(start) = v.starts_at {
                result.starts_at = Some(match result.starts_at {
                    Some(cur) if cur <= start => cur,
                    _ => start,
                });
            }
            if let Some(lo) = v.altitude_lo {
                result.altitude_lo = Some(match result.altitude_lo {
                    Some(cur) if cur <= lo => cur,
                    _ => lo,
                });
            }
            if let Some(hi) = v.altitude_hi {
                result.altitude_hi = Some(match result.altitude_hi {
                    Some(cur) if cur >= hi => cur,
                    _ => hi,
                });
            }
            if v.footprint.is_some() {
                cells = cells.merged(&v.covering(cfg)?);
            }
        }

        if !cells.is_empty() {
            result.footprint = Some(FootprintSource::Cells(cells));
        }
        Ok(result)
    }

    /// 4-D overlap against an entity's stored extent. `None` bounds are
    /// open-ended on that side.
    pub fn intersects(&self, other: &Volume4D, cfg: &CoverConfig) -> Result<bool, DssError> {
        if !ranges_overlap(self.starts_at, self.ends_at, other.starts_at, other.ends_at) {
            return Ok(false);
        }
        if !ranges_overlap(
            self.altitude_lo,
            self.altitude_hi,
            other.altitude_lo,
            other.altitude_hi,
        ) {
            return Ok(false);
        }
        let a = self.covering(cfg)?;
        let b = other.covering(cfg)?;
        Ok(a.intersects(&b))
    }
}

fn ranges_overlap<T: PartialOrd>(
    a_lo: Option<T>,
    a_hi: Option<T>,
    b_lo: Option<T>,
    b_hi: Option<T>,
) -> bool {
    if let (Some(a_hi), Some(b_lo)) = (&a_hi, &b_lo) {
        if a_hi < b_lo {
            return false;
        }
    }
    if let (Some(b_hi), Some(a_lo)) = (&b_hi, &a_lo) {
        if b_hi < a_lo {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use dss_geo::{GeoPolygon, LatLng};

    fn box_footprint(lat_lo: f64, lng_lo: f64, lat_hi: f64, lng_hi: f64) -> FootprintSource {
        FootprintSource::Geometry(Footprint::Polygon(GeoPolygon {
            vertices: vec![
                LatLng::new(lat_lo, lng_lo),
                LatLng::new(lat_lo, lng_hi),
                LatLng::new(lat_hi, lng_hi),
                LatLng::new(lat_hi, lng_lo),
            ],
        }))
    }

    #[test]
    fn union_takes_widest_bounds() {
        let cfg = CoverConfig::default();
        let t0 = Utc::now();
        let a = Volume4D {
            starts_at: Some(t0),
            ends_at: Some(t0 + TimeDelta::hours(1)),
            altitude_lo: Some(100.0),
            altitude_hi: Some(200.0),
            footprint: Some(box_footprint(37.00, -122.00, 37.02, -121.98)),
        };
        let b = Volume4D {
            starts_at: Some(t0 - TimeDelta::minutes(30)),
            ends_at: Some(t0 + TimeDelta::minutes(30)),
            altitude_lo: Some(50.0),
            altitude_hi: Some(150.0),
            footprint: Some(box_footprint(37.01, -121.99, 37.03, -121.97)),
        };

        let u = Volume4D::union(&[a.clone(), b.clone()], &cfg).unwrap();
        assert_eq!(u.starts_at, Some(t0 - TimeDelta::minutes(30)));
        assert_eq!(u.ends_at, Some(t0 + TimeDelta::hours(1)));
        assert_eq!(u.altitude_lo, Some(50.0));
        assert_eq!(u.altitude_hi, Some(200.0));

        let uc = u.covering(&cfg).unwrap();
        assert!(uc.contains(&a.covering(&cfg).unwrap()));
        assert!(uc.contains(&b.covering(&cfg).unwrap()));
    }

    #[test]
    fn disjoint_times_do_not_intersect() {
        let cfg = CoverConfig::default();
        let t0 = Utc::now();
        let a = Volume4D {
            starts_at: Some(t0),
            ends_at: Some(t0 + TimeDelta::hours(1)),
            footprint: Some(box_footprint(37.00, -122.00, 37.02, -121.98)),
            ..Default::default()
        };
        let b = Volume4D {
            starts_at: Some(t0 + TimeDelta::hours(2)),
            ends_at: Some(t0 + TimeDelta::hours(3)),
            footprint: Some(box_footprint(37.00, -122.00, 37.02, -121.98)),
            ..Default::default()
        };
        assert!(!a.intersects(&b, &cfg).unwrap());
    }

    #[test]
    fn disjoint_altitudes_do_not_intersect() {
        let cfg = CoverConfig::default();
        let a = Volume4D {
            altitude_lo: Some(0.0),
            altitude_hi: Some(100.0),
            footprint: Some(box_footprint(37.00, -122.00, 37.02, -121.98)),
            ..Default::default()
        };
        let b = Volume4D {
            altitude_lo: Some(200.0),
            altitude_hi: Some(300.0),
            footprint: Some(box_footprint(37.00, -122.00, 37.02, -121.98)),
            ..Default::default()
        };
        assert!(!a.intersects(&b, &cfg).unwrap());

        let c = Volume4D {
            altitude_lo: Some(50.0),
            altitude_hi: Some(250.0),
            footprint: Some(box_footprint(37.00, -122.00, 37.02, -121.98)),
            ..Default::default()
        };
        assert!(a.intersects(&c, &cfg).unwrap());
        assert!(b.intersects(&c, &cfg).unwrap());
    }

    #[test]
    fn open_ended_bounds_overlap() {
        let cfg = CoverConfig::default();
        let a = Volume4D {
            footprint: Some(box_footprint(37.00, -122.00, 37.02, -121.98)),
            ..Default::default()
        };
        let b = Volume4D {
            starts_at: Some(Utc::now()),
            ends_at: Some(Utc::now() + TimeDelta::hours(1)),
            footprint: Some(box_footprint(37.01, -121.99, 37.03, -121.97)),
            ..Default::default()
        };
        assert!(a.intersects(&b, &cfg).unwrap());
    }
}
