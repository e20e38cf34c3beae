//! Point-in-region resolution over the stored hierarchy.
//!
//! [`ContainmentResolver`] scans the database on every call;
//! [`RegionIndex`] answers the same questions from an in-memory R-tree
//! snapshot. Both go through the candidate helpers below so their results
//! agree.

pub mod index;

pub use index::RegionIndex;

use crate::error::AreaError;
use crate::geometry::{
    bounding_box, decode_geometry, distance_to_geometry_km, haversine_km, point_in_polygon,
    Coordinate,
};
use crate::storage::entity::area::Model as AreaModel;
use crate::storage::repository::{Area, AreaKind, AreaRepository};
use geo::{Geometry, Rect};
use log::debug;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NearbyArea {
    pub area: Area,
    pub distance_km: f64,
}

/// A stored region with its geometry decoded once.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub area: Area,
    pub geometry: Option<Geometry<f64>>,
    pub bbox: Option<Rect<f64>>,
}

impl Candidate {
    pub fn from_model(model: AreaModel) -> Self {
        let geometry = model.geometry.as_deref().and_then(|text| {
            decode_geometry(text)
                .map_err(|e| debug!("area {} has undecodable geometry: {e}", model.id))
                .ok()
        });
        let bbox = geometry.as_ref().and_then(bounding_box);
        Self {
            area: Area::from(model),
            geometry,
            bbox,
        }
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        let (Some(geometry), Some(bbox)) = (&self.geometry, &self.bbox) else {
            return false;
        };
        let (min, max) = (bbox.min(), bbox.max());
        let in_box = point.lon >= min.x && point.lon <= max.x && point.lat >= min.y && point.lat <= max.y;
        in_box && point_in_polygon(point, geometry)
    }

    /// Closest of geometry distance and center distance.
    pub fn distance_km(&self, point: Coordinate) -> Option<f64> {
        let by_shape = self
            .geometry
            .as_ref()
            .and_then(|g| distance_to_geometry_km(point, g));
        let by_center = self.area.center.map(|c| haversine_km(point, c));
        match (by_shape, by_center) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

pub(crate) fn validate_point(lat: f64, lon: f64) -> Result<Coordinate, AreaError> {
    Coordinate::validated(lat, lon).map_err(|_| AreaError::InvalidCoordinate { lat, lon })
}

pub(crate) fn validate_radius(radius_km: f64) -> Result<f64, AreaError> {
    if radius_km.is_finite() && radius_km >= 0.0 {
        Ok(radius_km)
    } else {
        Err(AreaError::InvalidRadius(radius_km))
    }
}

/// Coarsest first; ties broken by id so output is stable.
pub(crate) fn order_by_level(mut areas: Vec<Area>) -> Vec<Area> {
    areas.sort_by(|a, b| a.level.cmp(&b.level).then(a.id.cmp(&b.id)));
    areas
}

pub(crate) fn order_by_distance(mut found: Vec<NearbyArea>) -> Vec<NearbyArea> {
    found.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then(a.area.level.cmp(&b.area.level))
            .then(a.area.id.cmp(&b.area.id))
    });
    found
}

pub(crate) fn collect_nearby<'a>(
    candidates: impl Iterator<Item = &'a Candidate>,
    point: Coordinate,
    radius_km: f64,
) -> Vec<NearbyArea> {
    let found = candidates
        .filter_map(|c| {
            c.distance_km(point)
                .filter(|d| *d <= radius_km)
                .map(|distance_km| NearbyArea {
                    area: c.area.clone(),
                    distance_km,
                })
        })
        .collect();
    order_by_distance(found)
}

/// Live resolver: reads active regions from the database per query.
#[derive(Clone)]
pub struct ContainmentResolver {
    db: Arc<DatabaseConnection>,
}

impl ContainmentResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn candidates_with_geometry(&self) -> Result<Vec<Candidate>, AreaError> {
        let rows = AreaRepository::list_active_with_geometry(self.db.as_ref()).await?;
        Ok(rows.into_iter().map(Candidate::from_model).collect())
    }

    /// Every active region containing the point, prefecture first.
    pub async fn find_regions_containing(&self, lat: f64, lon: f64) -> Result<Vec<Area>, AreaError> {
        let point = validate_point(lat, lon)?;
        let hits = self
            .candidates_with_geometry()
            .await?
            .into_iter()
            .filter(|c| c.contains(point))
            .map(|c| c.area)
            .collect();
        Ok(order_by_level(hits))
    }

    pub async fn find_regions_containing_of_kind(
        &self,
        lat: f64,
        lon: f64,
        kind: AreaKind,
    ) -> Result<Vec<Area>, AreaError> {
        let all = self.find_regions_containing(lat, lon).await?;
        Ok(all.into_iter().filter(|a| a.kind == kind).collect())
    }

    pub async fn most_specific(&self, lat: f64, lon: f64) -> Result<Option<Area>, AreaError> {
        Ok(self.find_regions_containing(lat, lon).await?.pop())
    }

    pub async fn find_nearby(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyArea>, AreaError> {
        let point = validate_point(lat, lon)?;
        let radius_km = validate_radius(radius_km)?;
        let rows = AreaRepository::list_active_locatable(self.db.as_ref()).await?;
        let candidates: Vec<Candidate> = rows.into_iter().map(Candidate::from_model).collect();
        Ok(collect_nearby(candidates.iter(), point, radius_km))
    }

    /// Immutable index over the current active regions.
    pub async fn snapshot(&self) -> Result<RegionIndex, AreaError> {
        Ok(RegionIndex::load(self.db.as_ref()).await?)
    }
}
