use crate::geocode::GeocodeError;
use crate::geometry::GeometryError;

/// Query-time failures. "Nothing found" is never an error: containment
/// queries return an empty list or `None` for that.
#[derive(thiserror::Error, Debug)]
pub enum AreaError {
    #[error("invalid coordinate lat={lat} lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("invalid radius {0} km")]
    InvalidRadius(f64),
    #[error("area {0} not found")]
    NotFound(i32),
    #[error("venue {0} not found")]
    VenueNotFound(i32),
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("geocoding failed: {0}")]
    Geocode(#[from] GeocodeError),
}
