pub mod codec;
pub mod distance;
pub mod ops;
pub mod validate;

pub use codec::{decode_geometry, encode_geometry, encode_geometry_value};
pub use distance::{distance_to_geometry_km, haversine_km};
pub use ops::{bounding_box, merge_polygons, point_in_polygon, representative_point};
pub use validate::is_usable_areal;

use geo::Point;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("invalid coordinate lat={lat} lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("invalid geometry document: {0}")]
    InvalidDocument(String),
    #[error("unsupported geometry: {0}")]
    Unsupported(String),
}

/// A WGS84 position. Interchange documents store `[lon, lat]`; this type
/// keeps the names explicit so callers cannot swap them silently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn validated(lat: f64, lon: f64) -> Result<Self, GeometryError> {
        let ok = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        if ok {
            Ok(Self { lat, lon })
        } else {
            Err(GeometryError::InvalidCoordinate { lat, lon })
        }
    }

    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    pub fn from_point(p: Point<f64>) -> Self {
        Self {
            lat: p.y(),
            lon: p.x(),
        }
    }
}
