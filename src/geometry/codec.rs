use super::GeometryError;
use geo::Geometry;
use geojson::GeoJson;
use serde_json::Value;

/// Parses a stored interchange document (`{"type": ..., "coordinates": ...}`).
/// A `Feature` wrapper is accepted and unwrapped; collections are not.
pub fn decode_geometry(text: &str) -> Result<Geometry<f64>, GeometryError> {
    let gj: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| GeometryError::InvalidDocument(e.to_string()))?;
    let geometry = match gj {
        GeoJson::Geometry(g) => g,
        GeoJson::Feature(f) => f
            .geometry
            .ok_or_else(|| GeometryError::InvalidDocument("feature without geometry".into()))?,
        GeoJson::FeatureCollection(_) => {
            return Err(GeometryError::Unsupported("FeatureCollection".into()))
        }
    };
    decode_geojson(geometry)
}

pub fn decode_geojson(geometry: geojson::Geometry) -> Result<Geometry<f64>, GeometryError> {
    Geometry::<f64>::try_from(geometry.value)
        .map_err(|e| GeometryError::InvalidDocument(e.to_string()))
}

pub fn encode_geometry_value(geometry: &Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

pub fn encode_geometry(geometry: &Geometry<f64>) -> Result<String, GeometryError> {
    serde_json::to_string(&encode_geometry_value(geometry))
        .map_err(|e| GeometryError::InvalidDocument(e.to_string()))
}

/// Decodes a stored column into a JSON value for API output; unparsable
/// text degrades to `None` rather than failing the whole record.
pub fn stored_as_json(text: Option<&str>) -> Option<Value> {
    text.and_then(|t| serde_json::from_str(t).ok())
}
