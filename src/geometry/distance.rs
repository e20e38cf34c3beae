use super::Coordinate;
use geo::{Closest, ClosestPoint, Geometry, HaversineDistance, Intersects};

/// Great-circle distance in kilometres.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    a.to_point().haversine_distance(&b.to_point()) / 1000.0
}

/// Distance from a point to a shape: zero when the shape contains the
/// point, otherwise the great-circle distance to the nearest point of the
/// shape. The nearest point is found in lon/lat space, which is close
/// enough at municipal scale.
pub fn distance_to_geometry_km(point: Coordinate, geometry: &Geometry<f64>) -> Option<f64> {
    let p = point.to_point();
    if geometry.intersects(&p) {
        return Some(0.0);
    }
    match geometry.closest_point(&p) {
        Closest::Intersection(q) | Closest::SinglePoint(q) => {
            Some(haversine_km(point, Coordinate::from_point(q)))
        }
        Closest::Indeterminate => None,
    }
}
