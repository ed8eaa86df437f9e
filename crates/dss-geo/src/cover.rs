//! Footprint validation and fixed-level cell coverings.
//!
//! Every footprint is covered at a single fixed level (default 13, roughly
//! 1 km cells). Covering everything at one level is what makes the
//! datastore's array-overlap predicate a sound intersection test: two
//! multi-level covers of overlapping regions need not share a cell ID, two
//! same-level covers always do.
//!
//! Covering is a conservative descent from the six face cells: a cell is
//! pruned only when its bounding cap provably misses the region, and kept at
//! the target level when it may touch it. Over-inclusion costs a spurious
//! notification; under-inclusion would lose one, so all tests err on the
//! inclusive side.

use crate::cellid::{centroid, CellId, CellUnion, LatLng, Point};
use crate::GeoError;

/// Mean earth radius, meters.
const EARTH_RADIUS_M: f64 = 6_371_010.0;

/// Cover level used for every footprint.
pub const DEFAULT_COVER_LEVEL: u8 = 13;

/// Largest footprint the service accepts, in km².
pub const DEFAULT_MAX_AREA_KM2: f64 = 2500.0;

/// Tunables for the covering pass.
#[derive(Debug, Clone, Copy)]
pub struct CoverConfig {
    pub level: u8,
    pub max_area_km2: f64,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_COVER_LEVEL,
            max_area_km2: DEFAULT_MAX_AREA_KM2,
        }
    }
}

// ---------------------------------------------------------------------------
// Footprints
// ---------------------------------------------------------------------------

/// An enclosed area on the earth. Edges are the shortest paths between
/// consecutive vertices; the final vertex connects back to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPolygon {
    pub vertices: Vec<LatLng>,
}

/// A circular enclosed area on the earth's surface.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoCircle {
    pub center: LatLng,
    pub radius_m: f64,
}

/// The spatial footprint of an entity or query volume.
#[derive(Debug, Clone, PartialEq)]
pub enum Footprint {
    Polygon(GeoPolygon),
    Circle(GeoCircle),
}

impl Footprint {
    /// Validate the footprint and produce its fixed-level cell cover.
    pub fn covering(&self, cfg: &CoverConfig) -> Result<CellUnion, GeoError> {
        match self {
            Footprint::Polygon(p) => p.covering(cfg),
            Footprint::Circle(c) => c.covering(cfg),
        }
    }

    /// Footprint area in km², after validation.
    pub fn area_km2(&self) -> Result<f64, GeoError> {
        match self {
            Footprint::Polygon(p) => {
                p.validate()?;
                Ok(p.area_km2())
            }
            Footprint::Circle(c) => {
                c.validate()?;
                Ok(c.area_km2())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Area query string
// ---------------------------------------------------------------------------

/// Parse the `area` query parameter: `lat1,lng1,lat2,lng2,…` in decimal
/// degrees, at least three vertices, closed implicitly.
pub fn parse_area(area: &str) -> Result<GeoPolygon, GeoError> {
    let parts: Vec<&str> = area
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.len() % 2 != 0 {
        return Err(GeoError::BadCoordinates);
    }
    if parts.len() < 6 {
        return Err(GeoError::NotEnoughVertices);
    }

    let mut vertices = Vec::with_capacity(parts.len() / 2);
    for pair in parts.chunks(2) {
        let lat: f64 = pair[0].parse().map_err(|_| GeoError::BadCoordinates)?;
        let lng: f64 = pair[1].parse().map_err(|_| GeoError::BadCoordinates)?;
        vertices.push(LatLng::new(lat, lng));
    }

    Ok(GeoPolygon { vertices })
}

// ---------------------------------------------------------------------------
// Polygon
// ---------------------------------------------------------------------------

impl GeoPolygon {
    pub fn validate(&self) -> Result<(), GeoError> {
        if self.vertices.len() < 3 {
            return Err(GeoError::NotEnoughVertices);
        }
        for v in &self.vertices {
            if !v.is_valid() {
                return Err(GeoError::BadCoordinates);
            }
        }

        let pts = self.unwrapped();
        let n = pts.len();

        // Consecutive duplicates (including an explicit closing vertex)
        // do not form a well-defined edge.
        for i in 0..n {
            let a = pts[i];
            let b = pts[(i + 1) % n];
            if (a.0 - b.0).abs() < 1e-12 && (a.1 - b.1).abs() < 1e-12 {
                return Err(GeoError::BadCoordinates);
            }
        }

        // Non-adjacent edges may not cross.
        for i in 0..n {
            let a1 = pts[i];
            let a2 = pts[(i + 1) % n];
            for j in (i + 1)..n {
                // skip the shared-vertex neighbours of edge i
                if j == i || (j + 1) % n == i || (i + 1) % n == j {
                    continue;
                }
                let b1 = pts[j];
                let b2 = pts[(j + 1) % n];
                if segments_cross(a1, a2, b1, b2) {
                    return Err(GeoError::SelfIntersecting);
                }
            }
        }

        Ok(())
    }

    /// Enclosed area in km² (spherical line-integral formula).
    pub fn area_km2(&self) -> f64 {
        let pts = self.unwrapped();
        let n = pts.len();
        let mut total = 0.0;
        for i in 0..n {
            let (x1, y1) = pts[i];
            let (x2, y2) = pts[(i + 1) % n];
            total += (x2 - x1).to_radians() * (y1.to_radians().sin() + y2.to_radians().sin());
        }
        let r_km = EARTH_RADIUS_M / 1000.0;
        (total.abs() / 2.0) * r_km * r_km
    }

    pub fn covering(&self, cfg: &CoverConfig) -> Result<CellUnion, GeoError> {
        self.validate()?;
        let area = self.area_km2();
        if area > cfg.max_area_km2 {
            return Err(GeoError::AreaTooLarge {
                actual_km2: area,
                max_km2: cfg.max_area_km2,
            });
        }

        let region = PreparedPolygon::new(self);
        let mut out = Vec::new();
        for f in 0..6 {
            descend(CellId::from_face(f), cfg.level, &region, &mut out);
        }
        Ok(CellUnion::new(out))
    }

    /// Vertex coordinates as (lng, lat) with longitudes unwrapped relative
    /// to the first vertex, so a footprint straddling the antimeridian is
    /// contiguous in the plane.
    fn unwrapped(&self) -> Vec<(f64, f64)> {
        let reference = self.vertices[0].lng;
        self.vertices
            .iter()
            .map(|v| (unwrap_lng(v.lng, reference), v.lat))
            .collect()
    }
}

impl GeoCircle {
    pub fn validate(&self) -> Result<(), GeoError> {
        if !self.center.is_valid() {
            return Err(GeoError::BadCoordinates);
        }
        if !(self.radius_m > 0.0) {
            return Err(GeoError::RadiusNotPositive);
        }
        Ok(())
    }

    pub fn area_km2(&self) -> f64 {
        let r_km = EARTH_RADIUS_M / 1000.0;
        let angle = self.radius_m / EARTH_RADIUS_M;
        2.0 * std::f64::consts::PI * r_km * r_km * (1.0 - angle.cos())
    }

    pub fn covering(&self, cfg: &CoverConfig) -> Result<CellUnion, GeoError> {
        self.validate()?;
        let area = self.area_km2();
        if area > cfg.max_area_km2 {
            return Err(GeoError::AreaTooLarge {
                actual_km2: area,
                max_km2: cfg.max_area_km2,
            });
        }

        let region = PreparedCircle {
            center: self.center.to_point(),
            radius_rad: self.radius_m / EARTH_RADIUS_M,
        };
        let mut out = Vec::new();
        for f in 0..6 {
            descend(CellId::from_face(f), cfg.level, &region, &mut out);
        }
        Ok(CellUnion::new(out))
    }
}

// ---------------------------------------------------------------------------
// Covering descent
// ---------------------------------------------------------------------------

trait Region {
    /// Conservative pruning test: must return true whenever the cell could
    /// touch the region. False positives are acceptable (the descent just
    /// keeps refining), false negatives are not.
    fn may_intersect(&self, cell: CellId) -> bool;

    /// Target-level keep test. Still conservative, but as tight as the
    /// region representation allows.
    fn intersects(&self, cell: CellId) -> bool;
}

fn descend<R: Region>(cell: CellId, target_level: u8, region: &R, out: &mut Vec<CellId>) {
    if !region.may_intersect(cell) {
        return;
    }
    if cell.level() >= target_level {
        if region.intersects(cell) {
            out.push(cell);
        }
        return;
    }
    for child in cell.children() {
        descend(child, target_level, region, out);
    }
}

/// Angle from the cell center to its farthest corner.
fn cell_circumradius(cell: CellId) -> f64 {
    let center = cell.center();
    cell.corners()
        .iter()
        .map(|c| center.angle(c))
        .fold(0.0, f64::max)
}

struct PreparedCircle {
    center: Point,
    radius_rad: f64,
}

impl Region for PreparedCircle {
    fn may_intersect(&self, cell: CellId) -> bool {
        let d = self.center.angle(&cell.center());
        d <= self.radius_rad + cell_circumradius(cell) + 1e-9
    }

    fn intersects(&self, cell: CellId) -> bool {
        // The cap test is already within a cell-diagonal of exact.
        self.may_intersect(cell)
    }
}

struct PreparedPolygon {
    cap_center: Point,
    cap_radius: f64,
    /// (lng, lat) with unwrapped longitudes.
    pts: Vec<(f64, f64)>,
    reference_lng: f64,
}

impl PreparedPolygon {
    fn new(polygon: &GeoPolygon) -> Self {
        let points: Vec<Point> = polygon.vertices.iter().map(|v| v.to_point()).collect();
        let cap_center = centroid(&points);
        let cap_radius = points
            .iter()
            .map(|p| cap_center.angle(p))
            .fold(0.0, f64::max);
        Self {
            cap_center,
            cap_radius,
            pts: polygon.unwrapped(),
            reference_lng: polygon.vertices[0].lng,
        }
    }

    /// Detailed planar test, run once the cap test has placed the cell near
    /// the polygon (so the unwrapped plane is locally consistent).
    fn overlaps_cell(&self, cell: CellId) -> bool {
        let corners: Vec<(f64, f64)> = cell
            .corners()
            .iter()
            .map(|p| {
                let ll = p.to_lat_lng();
                (unwrap_lng(ll.lng, self.reference_lng), ll.lat)
            })
            .collect();
        let center = {
            let ll = cell.center().to_lat_lng();
            (unwrap_lng(ll.lng, self.reference_lng), ll.lat)
        };

        // Cell bound in the plane, padded against geodesic-vs-planar drift.
        let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);
        let pad_x = (max_x - min_x) * 0.05 + 1e-9;
        let pad_y = (max_y - min_y) * 0.05 + 1e-9;
        let (min_x, max_x) = (min_x - pad_x, max_x + pad_x);
        let (min_y, max_y) = (min_y - pad_y, max_y + pad_y);

        // Any polygon vertex inside the cell: overlap.
        if self
            .pts
            .iter()
            .any(|&(x, y)| x >= min_x && x <= max_x && y >= min_y && y <= max_y)
        {
            return true;
        }

        // Any cell corner (or the center) inside the polygon: overlap.
        if point_in_polygon(center, &self.pts)
            || corners.iter().any(|&c| point_in_polygon(c, &self.pts))
        {
            return true;
        }

        // Any polygon edge crossing a cell edge: overlap.
        let n = self.pts.len();
        for i in 0..n {
            let p1 = self.pts[i];
            let p2 = self.pts[(i + 1) % n];
            for k in 0..4 {
                let c1 = corners[k];
                let c2 = corners[(k + 1) % 4];
                if segments_cross(p1, p2, c1, c2) {
                    return true;
                }
            }
        }

        false
    }
}

impl Region for PreparedPolygon {
    fn may_intersect(&self, cell: CellId) -> bool {
        let d = self.cap_center.angle(&cell.center());
        d <= self.cap_radius + cell_circumradius(cell) + 1e-9
    }

    fn intersects(&self, cell: CellId) -> bool {
        self.may_intersect(cell) && self.overlaps_cell(cell)
    }
}

// ---------------------------------------------------------------------------
// Planar helpers
// ---------------------------------------------------------------------------

/// Shift `lng` by whole turns so it lands within ±180° of `reference`.
fn unwrap_lng(lng: f64, reference: f64) -> f64 {
    let mut d = lng - reference;
    while d > 180.0 {
        d -= 360.0;
    }
    while d < -180.0 {
        d += 360.0;
    }
    reference + d
}

/// Even-odd rule point-in-polygon in the unwrapped plane.
fn point_in_polygon(pt: (f64, f64), poly: &[(f64, f64)]) -> bool {
    let (px, py) = pt;
    let n = poly.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = poly[i];
        let (xj, yj) = poly[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn orientation(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Proper segment crossing test (shared endpoints do not count).
fn segments_cross(a1: (f64, f64), a2: (f64, f64), b1: (f64, f64), b2: (f64, f64)) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(lat_lo: f64, lng_lo: f64, lat_hi: f64, lng_hi: f64) -> GeoPolygon {
        GeoPolygon {
            vertices: vec![
                LatLng::new(lat_lo, lng_lo),
                LatLng::new(lat_lo, lng_hi),
                LatLng::new(lat_hi, lng_hi),
                LatLng::new(lat_hi, lng_lo),
            ],
        }
    }

    #[test]
    fn two_vertex_polygon_rejected() {
        let p = GeoPolygon {
            vertices: vec![LatLng::new(37.0, -122.0), LatLng::new(37.1, -122.0)],
        };
        assert_eq!(p.validate(), Err(GeoError::NotEnoughVertices));
    }

    #[test]
    fn off_earth_vertex_rejected() {
        let p = GeoPolygon {
            vertices: vec![
                LatLng::new(91.0, 0.0),
                LatLng::new(0.0, 1.0),
                LatLng::new(1.0, 0.0),
            ],
        };
        assert_eq!(p.validate(), Err(GeoError::BadCoordinates));
    }

    #[test]
    fn bowtie_rejected() {
        let p = GeoPolygon {
            vertices: vec![
                LatLng::new(0.0, 0.0),
                LatLng::new(1.0, 1.0),
                LatLng::new(1.0, 0.0),
                LatLng::new(0.0, 1.0),
            ],
        };
        assert_eq!(p.validate(), Err(GeoError::SelfIntersecting));
    }

    #[test]
    fn zero_radius_circle_rejected() {
        let c = GeoCircle {
            center: LatLng::new(37.0, -122.0),
            radius_m: 0.0,
        };
        assert_eq!(c.validate(), Err(GeoError::RadiusNotPositive));
    }

    #[test]
    fn square_area_is_roughly_right() {
        // ~0.1° square near the equator: about 11.1 km × 11.1 km.
        let p = square(0.0, 0.0, 0.1, 0.1);
        let area = p.area_km2();
        assert!(area > 100.0 && area < 140.0, "area = {area}");
    }

    #[test]
    fn oversized_polygon_hits_area_gate() {
        let p = square(30.0, -100.0, 33.0, -97.0);
        let err = p.covering(&CoverConfig::default()).unwrap_err();
        assert!(matches!(err, GeoError::AreaTooLarge { .. }));
    }

    #[test]
    fn small_square_cover_contains_interior_point() {
        let p = square(37.00, -122.00, 37.05, -121.95);
        let cover = p.covering(&CoverConfig::default()).unwrap();
        assert!(!cover.is_empty());
        for c in cover.cells() {
            assert_eq!(c.level(), DEFAULT_COVER_LEVEL);
        }
        let interior =
            CellId::from_lat_lng_at_level(LatLng::new(37.025, -121.975), DEFAULT_COVER_LEVEL);
        assert!(cover.contains_cell(interior));
    }

    #[test]
    fn circle_cover_contains_center_and_misses_far_cells() {
        let c = GeoCircle {
            center: LatLng::new(48.8566, 2.3522),
            radius_m: 500.0,
        };
        let cover = c.covering(&CoverConfig::default()).unwrap();
        let center_cell =
            CellId::from_lat_lng_at_level(LatLng::new(48.8566, 2.3522), DEFAULT_COVER_LEVEL);
        assert!(cover.contains_cell(center_cell));

        let far = CellId::from_lat_lng_at_level(LatLng::new(40.7128, -74.0060), DEFAULT_COVER_LEVEL);
        assert!(!cover.contains_cell(far));
    }

    #[test]
    fn overlapping_footprints_share_cells() {
        let a = square(37.00, -122.00, 37.04, -121.96)
            .covering(&CoverConfig::default())
            .unwrap();
        let b = square(37.02, -121.98, 37.06, -121.94)
            .covering(&CoverConfig::default())
            .unwrap();
        let c = square(38.50, -120.00, 38.54, -119.96)
            .covering(&CoverConfig::default())
            .unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn parse_area_happy_path_and_errors() {
        let p = parse_area("37.0,-122.0,37.1,-122.0,37.1,-121.9").unwrap();
        assert_eq!(p.vertices.len(), 3);
        assert_eq!(p.vertices[2], LatLng::new(37.1, -121.9));

        assert_eq!(parse_area("37.0,-122.0,37.1"), Err(GeoError::BadCoordinates));
        assert_eq!(
            parse_area("37.0,-122.0,37.1,-122.0"),
            Err(GeoError::NotEnoughVertices)
        );
        assert_eq!(
            parse_area("x,-122.0,37.1,-122.0,37.1,-121.9"),
            Err(GeoError::BadCoordinates)
        );
    }
}
