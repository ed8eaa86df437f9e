//! Spatial indexing for the DSS.
//!
//! Airspace footprints (polygons and circles on the WGS-84 ellipsoid) are
//! projected onto unions of S2 cells at a fixed level, so that "do these two
//! 4-D volumes overlap in space" reduces to a 64-bit integer set
//! intersection: cheap in process and expressible as an array-overlap
//! predicate (`cells && cells`) in the datastore.
//!
//! Only the subset of the S2 library the DSS actually consumes lives here:
//! cell IDs (face + Hilbert position encoding, levels 0–30), fixed-level
//! coverings, and the area gate that rejects oversized requests.

pub mod cellid;
pub mod cover;

pub use cellid::{CellId, CellUnion, LatLng, MAX_CELL_LEVEL};
pub use cover::{
    parse_area, Footprint, GeoCircle, GeoPolygon, CoverConfig, DEFAULT_COVER_LEVEL,
    DEFAULT_MAX_AREA_KM2,
};

use thiserror::Error;

/// Errors surfaced by geometry validation and covering.
#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("not enough points in polygon")]
    NotEnoughVertices,

    #[error("coordinates did not create a well formed area")]
    BadCoordinates,

    #[error("polygon edges may not cross")]
    SelfIntersecting,

    #[error("radius must be larger than 0")]
    RadiusNotPositive,

    /// The requested footprint covers more area than the service accepts.
    #[error("area of {actual_km2:.1} km2 exceeds the maximum of {max_km2:.1} km2")]
    AreaTooLarge { actual_km2: f64, max_km2: f64 },

    #[error("invalid cell id")]
    InvalidCell,
}
