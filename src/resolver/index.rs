use super::{collect_nearby, order_by_level, validate_point, validate_radius, Candidate, NearbyArea};
use crate::error::AreaError;
use crate::geometry::Coordinate;
use crate::storage::entity::area::Model as AreaModel;
use crate::storage::repository::{Area, AreaKind, AreaRepository};
use rstar::{Envelope, RTree, RTreeObject, AABB};
use sea_orm::ConnectionTrait;

// 每纬度公里数，向下取整，保证搜索窗口不小于实际半径
const KM_PER_DEGREE: f64 = 110.0;

struct RegionNode {
    slot: usize,
    bbox: AABB<[f64; 2]>,
}

impl RTreeObject for RegionNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox
    }
}

/// Snapshot of the active regions keyed by bounding box. Regions with only
/// a center point are indexed by that point for proximity queries.
pub struct RegionIndex {
    regions: Vec<Candidate>,
    tree: RTree<RegionNode>,
}

impl RegionIndex {
    pub fn build(models: Vec<AreaModel>) -> Self {
        let regions: Vec<Candidate> = models
            .into_iter()
            .filter(|m| m.is_active)
            .map(Candidate::from_model)
            .collect();

        let nodes: Vec<RegionNode> = regions
            .iter()
            .enumerate()
            .filter_map(|(slot, c)| envelope_of(c).map(|bbox| RegionNode { slot, bbox }))
            .collect();

        Self {
            regions,
            tree: RTree::bulk_load(nodes),
        }
    }

    pub async fn load<C: ConnectionTrait>(db: &C) -> Result<Self, sea_orm::DbErr> {
        let rows = AreaRepository::list_active_locatable(db).await?;
        Ok(Self::build(rows))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn find_regions_containing(&self, lat: f64, lon: f64) -> Result<Vec<Area>, AreaError> {
        let point = validate_point(lat, lon)?;
        let hits = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point([point.lon, point.lat]))
            .map(|node| &self.regions[node.slot])
            .filter(|c| c.contains(point))
            .map(|c| c.area.clone())
            .collect();
        Ok(order_by_level(hits))
    }

    pub fn find_regions_containing_of_kind(
        &self,
        lat: f64,
        lon: f64,
        kind: AreaKind,
    ) -> Result<Vec<Area>, AreaError> {
        let all = self.find_regions_containing(lat, lon)?;
        Ok(all.into_iter().filter(|a| a.kind == kind).collect())
    }

    pub fn most_specific(&self, lat: f64, lon: f64) -> Result<Option<Area>, AreaError> {
        Ok(self.find_regions_containing(lat, lon)?.pop())
    }

    pub fn find_nearby(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyArea>, AreaError> {
        let point = validate_point(lat, lon)?;
        let radius_km = validate_radius(radius_km)?;
        let mut slots: Vec<usize> = search_windows(point, radius_km)
            .iter()
            .flat_map(|w| self.tree.locate_in_envelope_intersecting(w))
            .map(|node| node.slot)
            .collect();
        // 跨 180° 经线时两个窗口可能命中同一区域
        slots.sort_unstable();
        slots.dedup();
        let candidates = slots.into_iter().map(|slot| &self.regions[slot]);
        Ok(collect_nearby(candidates, point, radius_km))
    }
}

fn envelope_of(c: &Candidate) -> Option<AABB<[f64; 2]>> {
    let shape = c
        .bbox
        .filter(|_| c.geometry.is_some())
        .map(|r| AABB::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]));
    let center = c.area.center.map(|p| AABB::from_point([p.lon, p.lat]));
    match (shape, center) {
        (Some(a), Some(b)) => Some(a.merged(&b)),
        (a, b) => a.or(b),
    }
}

/// Degree boxes around the point that hold every position within
/// `radius_km`. Widens to the full longitude range near the poles and
/// splits in two when the range crosses the antimeridian.
fn search_windows(point: Coordinate, radius_km: f64) -> Vec<AABB<[f64; 2]>> {
    let dlat = radius_km / KM_PER_DEGREE + 1e-9;
    let lat_lo = (point.lat - dlat).max(-90.0);
    let lat_hi = (point.lat + dlat).min(90.0);
    let worst_lat = lat_lo.abs().max(lat_hi.abs());
    let cos = worst_lat.to_radians().cos();
    let band = |lo: f64, hi: f64| AABB::from_corners([lo, lat_lo], [hi, lat_hi]);

    if cos < 1e-6 || dlat >= 90.0 {
        return vec![band(-180.0, 180.0)];
    }
    let dlon = dlat / cos;
    if dlon >= 180.0 {
        return vec![band(-180.0, 180.0)];
    }
    let (lon_lo, lon_hi) = (point.lon - dlon, point.lon + dlon);
    if lon_lo < -180.0 {
        vec![band(-180.0, lon_hi), band(lon_lo + 360.0, 180.0)]
    } else if lon_hi > 180.0 {
        vec![band(lon_lo, 180.0), band(-180.0, lon_hi - 360.0)]
    } else {
        vec![band(lon_lo, lon_hi)]
    }
}
