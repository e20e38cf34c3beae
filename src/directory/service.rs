use super::model::{AreaHierarchy, AreaNode, AssignStats, PopularArea, VenueAssignment};
use super::FULL_NAME_SEPARATOR;
use crate::error::AreaError;
use crate::geocode::{GeocodeError, Geocoder};
use crate::resolver::{ContainmentResolver, NearbyArea};
use crate::storage::repository::{Area, AreaKind, AreaRepository, VenueRepository};
use geojson::{Feature, FeatureCollection, JsonObject};
use log::{debug, info, warn};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Query facade over the stored hierarchy plus the venue assignment hooks.
pub struct AreaDirectoryService {
    db: Arc<DatabaseConnection>,
    resolver: ContainmentResolver,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl AreaDirectoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            resolver: ContainmentResolver::new(db.clone()),
            db,
            geocoder: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn resolver(&self) -> &ContainmentResolver {
        &self.resolver
    }

    /// Returns the row whether or not it is active.
    pub async fn get_region(&self, id: i32) -> Result<Area, AreaError> {
        AreaRepository::find_by_id(self.db.as_ref(), id)
            .await?
            .map(Area::from)
            .ok_or(AreaError::NotFound(id))
    }

    pub async fn list_children(&self, id: i32) -> Result<Vec<Area>, AreaError> {
        self.get_region(id).await?;
        let rows = AreaRepository::children(self.db.as_ref(), id).await?;
        Ok(rows.into_iter().map(Area::from).collect())
    }

    /// Root first, ending at the immediate parent.
    pub async fn list_ancestors(&self, id: i32) -> Result<Vec<Area>, AreaError> {
        self.get_region(id).await?;
        let rows = AreaRepository::ancestors(self.db.as_ref(), id).await?;
        Ok(rows.into_iter().map(Area::from).collect())
    }

    pub async fn full_name(&self, id: i32) -> Result<String, AreaError> {
        let area = self.get_region(id).await?;
        let mut names: Vec<String> = self
            .list_ancestors(id)
            .await?
            .into_iter()
            .map(|a| a.name)
            .collect();
        names.push(area.name);
        Ok(names.join(FULL_NAME_SEPARATOR))
    }

    /// Active subtree under `root_id`, or one tree per active top-level
    /// region when no root is given.
    pub async fn get_tree(&self, root_id: Option<i32>) -> Result<Vec<AreaNode>, AreaError> {
        let active = AreaRepository::list_active(self.db.as_ref()).await?;
        let mut by_parent: HashMap<i32, Vec<Area>> = HashMap::new();
        let mut roots = Vec::new();
        let mut by_id: HashMap<i32, Area> = HashMap::new();
        for model in active {
            let area = Area::from(model);
            match area.parent_id {
                Some(pid) => by_parent.entry(pid).or_default().push(area.clone()),
                None => roots.push(area.clone()),
            }
            by_id.insert(area.id, area);
        }

        let starts = match root_id {
            Some(id) => vec![by_id.remove(&id).ok_or(AreaError::NotFound(id))?],
            None => roots,
        };

        let mut seen = HashSet::new();
        Ok(starts
            .into_iter()
            .map(|area| build_node(area, &by_parent, &mut seen))
            .collect())
    }

    pub async fn find_regions_containing(&self, lat: f64, lon: f64) -> Result<Vec<Area>, AreaError> {
        self.resolver.find_regions_containing(lat, lon).await
    }

    pub async fn find_nearby(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyArea>, AreaError> {
        self.resolver.find_nearby(lat, lon, radius_km).await
    }

    /// The most specific active region containing the point.
    pub async fn resolve_for_venue(&self, lat: f64, lon: f64) -> Result<Option<Area>, AreaError> {
        self.resolver.most_specific(lat, lon).await
    }

    pub async fn hierarchy_at(&self, lat: f64, lon: f64) -> Result<AreaHierarchy, AreaError> {
        let mut out = AreaHierarchy::new();
        for area in self.resolver.find_regions_containing(lat, lon).await? {
            out.insert(area.kind, area);
        }
        Ok(out)
    }

    pub async fn search(&self, query: &str, limit: u64) -> Result<Vec<Area>, AreaError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let rows = AreaRepository::search(self.db.as_ref(), query, limit).await?;
        Ok(rows.into_iter().map(Area::from).collect())
    }

    /// Active areas with the most venues attached.
    pub async fn popular(&self, limit: usize) -> Result<Vec<PopularArea>, AreaError> {
        let db = self.db.as_ref();
        let counts = VenueRepository::counts_by_area(db).await?;
        let ids: Vec<i32> = counts.iter().map(|c| c.area_id).collect();
        let mut areas = AreaRepository::find_many(db, &ids).await?;
        Ok(counts
            .into_iter()
            .filter_map(|c| {
                areas
                    .remove(&c.area_id)
                    .filter(|m| m.is_active)
                    .map(|m| PopularArea {
                        area: Area::from(m),
                        venue_count: c.count,
                    })
            })
            .take(limit)
            .collect())
    }

    /// Active areas with geometry as a FeatureCollection, optionally one
    /// level only.
    pub async fn export_feature_collection(
        &self,
        level: Option<i32>,
    ) -> Result<FeatureCollection, AreaError> {
        let db = self.db.as_ref();
        let links = AreaRepository::name_links(db).await?;
        let rows = AreaRepository::list_active_with_geometry(db).await?;

        let mut features = Vec::new();
        for row in rows {
            if level.is_some_and(|l| l != row.level) {
                continue;
            }
            let Some(text) = row.geometry.as_deref() else {
                continue;
            };
            let geometry: geojson::Geometry = match serde_json::from_str(text) {
                Ok(g) => g,
                Err(e) => {
                    warn!("area {} skipped in export: {e}", row.id);
                    continue;
                }
            };
            let mut props = JsonObject::new();
            props.insert("id".into(), json!(row.id));
            props.insert("name".into(), json!(row.name));
            props.insert("area_type".into(), json!(row.area_type));
            props.insert("level".into(), json!(row.level));
            props.insert("full_name".into(), json!(full_name_from_links(&links, row.id)));
            features.push(Feature {
                bbox: None,
                geometry: Some(geometry),
                id: Some(geojson::feature::Id::Number(row.id.into())),
                properties: Some(props),
                foreign_members: None,
            });
        }
        debug!("exporting {} features", features.len());
        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }

    /// Resolves the venue's stored coordinates and records the region.
    pub async fn assign_venue(&self, venue_id: i32) -> Result<VenueAssignment, AreaError> {
        let venue = VenueRepository::find_by_id(self.db.as_ref(), venue_id)
            .await?
            .ok_or(AreaError::VenueNotFound(venue_id))?;
        let (Some(lat), Some(lon)) = (venue.latitude, venue.longitude) else {
            return Ok(VenueAssignment::NoCoordinates);
        };
        match self.resolve_for_venue(lat, lon).await? {
            Some(area) => {
                VenueRepository::set_area(self.db.as_ref(), venue.id, Some(area.id)).await?;
                Ok(VenueAssignment::Assigned(area))
            }
            None => Ok(VenueAssignment::NoRegion),
        }
    }

    /// Assigns every venue that has no region yet, against one index
    /// snapshot.
    pub async fn bulk_assign_venues(&self) -> Result<AssignStats, AreaError> {
        let db = self.db.as_ref();
        let venues = VenueRepository::unassigned(db).await?;
        let index = self.resolver.snapshot().await?;
        let mut stats = AssignStats {
            total: venues.len(),
            ..Default::default()
        };

        for venue in venues {
            let (Some(lat), Some(lon)) = (venue.latitude, venue.longitude) else {
                stats.no_coordinates += 1;
                continue;
            };
            match index.most_specific(lat, lon) {
                Ok(Some(area)) => {
                    VenueRepository::set_area(db, venue.id, Some(area.id)).await?;
                    stats.updated += 1;
                }
                Ok(None) => {
                    debug!("venue {} at ({lat}, {lon}) is outside every area", venue.id);
                    stats.failed += 1;
                }
                Err(e) => {
                    warn!("venue {}: {e}", venue.id);
                    stats.failed += 1;
                }
            }
        }
        info!(
            "venue assignment: {} total, {} updated, {} failed, {} without coordinates",
            stats.total, stats.updated, stats.failed, stats.no_coordinates
        );
        Ok(stats)
    }

    pub async fn detect_area_from_address(&self, address: &str) -> Result<Option<Area>, AreaError> {
        let geocoder = self
            .geocoder
            .as_ref()
            .ok_or(AreaError::Geocode(GeocodeError::MissingApiKey))?;
        match geocoder.geocode(address).await? {
            Some(point) => self.resolve_for_venue(point.lat, point.lon).await,
            None => Ok(None),
        }
    }

    /// Deletes the region and everything below it; venues pointing into the
    /// removed set are detached. Returns the number of regions removed.
    pub async fn delete_subtree(&self, id: i32) -> Result<u64, AreaError> {
        let txn = self.db.begin().await?;
        if AreaRepository::find_by_id(&txn, id).await?.is_none() {
            txn.rollback().await?;
            return Err(AreaError::NotFound(id));
        }
        let ids = AreaRepository::subtree_ids(&txn, id).await?;
        let detached = VenueRepository::clear_area_refs_in(&txn, &ids).await?;
        let removed = AreaRepository::delete_ids(&txn, &ids).await?;
        txn.commit().await?;
        info!("deleted area {id}: {removed} regions, {detached} venues detached");
        Ok(removed)
    }

    /// Kind filter over the containment chain.
    pub async fn find_regions_containing_of_kind(
        &self,
        lat: f64,
        lon: f64,
        kind: AreaKind,
    ) -> Result<Vec<Area>, AreaError> {
        self.resolver
            .find_regions_containing_of_kind(lat, lon, kind)
            .await
    }
}

fn build_node(
    area: Area,
    by_parent: &HashMap<i32, Vec<Area>>,
    seen: &mut HashSet<i32>,
) -> AreaNode {
    seen.insert(area.id);
    let children = by_parent
        .get(&area.id)
        .map(|kids| {
            kids.iter()
                .filter(|k| !seen.contains(&k.id))
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
        .into_iter()
        .map(|kid| build_node(kid, by_parent, seen))
        .collect();
    AreaNode { area, children }
}

fn full_name_from_links(links: &HashMap<i32, (String, Option<i32>)>, id: i32) -> String {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(id);
    while let Some(cur) = cursor {
        if !seen.insert(cur) {
            break;
        }
        match links.get(&cur) {
            Some((name, parent)) => {
                names.push(name.as_str());
                cursor = *parent;
            }
            None => break,
        }
    }
    names.reverse();
    names.join(FULL_NAME_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{encode_geometry, Coordinate};
    use crate::storage::establish_connection;
    use crate::storage::repository::NewArea;
    use async_trait::async_trait;
    use geo::{polygon, Geometry};

    fn square(x: f64, y: f64, size: f64) -> Option<String> {
        let g = Geometry::Polygon(polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size)
        ]);
        Some(encode_geometry(&g).unwrap())
    }

    async fn add(
        db: &DatabaseConnection,
        name: &str,
        kind: AreaKind,
        level: i32,
        parent_id: Option<i32>,
        geometry: Option<String>,
    ) -> i32 {
        AreaRepository::insert(
            db,
            &NewArea {
                name: name.into(),
                name_kana: None,
                kind,
                level,
                parent_id,
                geometry,
                center: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    struct Ids {
        pref: i32,
        city: i32,
        ward: i32,
        other: i32,
    }

    async fn seeded() -> (AreaDirectoryService, Ids) {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        let pref = add(&db, "大阪府", AreaKind::Prefecture, 0, None, square(135.0, 34.0, 1.0)).await;
        let city = add(&db, "大阪市", AreaKind::City, 1, Some(pref), square(135.4, 34.6, 0.2)).await;
        let ward = add(&db, "北区", AreaKind::Ward, 2, Some(city), square(135.45, 34.65, 0.1)).await;
        let other = add(&db, "堺市", AreaKind::City, 1, Some(pref), square(135.4, 34.4, 0.2)).await;
        (
            AreaDirectoryService::new(Arc::new(db)),
            Ids {
                pref,
                city,
                ward,
                other,
            },
        )
    }

    #[tokio::test]
    async fn lookups_and_not_found() {
        let (svc, ids) = seeded().await;
        assert_eq!(svc.get_region(ids.ward).await.unwrap().name, "北区");
        assert!(matches!(svc.get_region(9999).await, Err(AreaError::NotFound(9999))));
        assert!(matches!(svc.list_children(9999).await, Err(AreaError::NotFound(_))));

        let kids: Vec<String> = svc
            .list_children(ids.pref)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(kids, vec!["堺市".to_string(), "大阪市".to_string()]);

        let chain: Vec<i32> = svc
            .list_ancestors(ids.ward)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(chain, vec![ids.pref, ids.city]);
        assert!(svc.list_ancestors(ids.pref).await.unwrap().is_empty());
        assert_eq!(svc.full_name(ids.ward).await.unwrap(), "大阪府 > 大阪市 > 北区");
    }

    #[tokio::test]
    async fn tree_skips_inactive_branches() {
        let (svc, ids) = seeded().await;
        let forest = svc.get_tree(None).await.unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].size(), 4);
        assert_eq!(forest[0].depth(), 3);

        AreaRepository::set_active(svc.db.as_ref(), ids.city, false)
            .await
            .unwrap();
        let forest = svc.get_tree(None).await.unwrap();
        assert_eq!(forest[0].size(), 2);
        assert_eq!(forest[0].children[0].area.id, ids.other);

        let sub = svc.get_tree(Some(ids.other)).await.unwrap();
        assert_eq!(sub.len(), 1);
        assert!(sub[0].children.is_empty());
        assert!(matches!(svc.get_tree(Some(ids.city)).await, Err(AreaError::NotFound(_))));
    }

    #[tokio::test]
    async fn hierarchy_at_keys_by_kind() {
        let (svc, ids) = seeded().await;
        let h = svc.hierarchy_at(34.7, 135.5).await.unwrap();
        assert_eq!(h.get(&AreaKind::Prefecture).map(|a| a.id), Some(ids.pref));
        assert_eq!(h.get(&AreaKind::City).map(|a| a.id), Some(ids.city));
        assert_eq!(h.get(&AreaKind::Ward).map(|a| a.id), Some(ids.ward));
        assert!(svc.hierarchy_at(0.0, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn venue_assignment_paths() {
        let (svc, ids) = seeded().await;
        let db = svc.db.clone();
        let inside = VenueRepository::insert(db.as_ref(), "inside", Some(34.7), Some(135.5))
            .await
            .unwrap();
        let outside = VenueRepository::insert(db.as_ref(), "outside", Some(10.0), Some(10.0))
            .await
            .unwrap();
        let unknown = VenueRepository::insert(db.as_ref(), "unknown", None, None)
            .await
            .unwrap();

        match svc.assign_venue(inside.id).await.unwrap() {
            VenueAssignment::Assigned(area) => assert_eq!(area.id, ids.ward),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(svc.assign_venue(outside.id).await.unwrap(), VenueAssignment::NoRegion);
        assert_eq!(
            svc.assign_venue(unknown.id).await.unwrap(),
            VenueAssignment::NoCoordinates
        );
        assert!(matches!(
            svc.assign_venue(4242).await,
            Err(AreaError::VenueNotFound(4242))
        ));

        // inside is already assigned; the other two are retried
        let stats = svc.bulk_assign_venues().await.unwrap();
        assert_eq!(
            stats,
            AssignStats {
                total: 2,
                updated: 0,
                failed: 1,
                no_coordinates: 1
            }
        );

        let popular = svc.popular(5).await.unwrap();
        assert_eq!(popular.len(), 1);
        assert_eq!(popular[0].area.id, ids.ward);
        assert_eq!(popular[0].venue_count, 1);
    }

    #[tokio::test]
    async fn delete_subtree_detaches_venues() {
        let (svc, ids) = seeded().await;
        let db = svc.db.clone();
        let v = VenueRepository::insert(db.as_ref(), "v", Some(34.7), Some(135.5))
            .await
            .unwrap();
        svc.assign_venue(v.id).await.unwrap();

        assert_eq!(svc.delete_subtree(ids.city).await.unwrap(), 2);
        assert!(matches!(svc.get_region(ids.ward).await, Err(AreaError::NotFound(_))));
        let v = VenueRepository::find_by_id(db.as_ref(), v.id).await.unwrap().unwrap();
        assert_eq!(v.area_id, None);
        assert!(matches!(svc.delete_subtree(ids.city).await, Err(AreaError::NotFound(_))));
    }

    #[tokio::test]
    async fn export_and_search() {
        let (svc, ids) = seeded().await;
        let all = svc.export_feature_collection(None).await.unwrap();
        assert_eq!(all.features.len(), 4);
        let wards = svc.export_feature_collection(Some(2)).await.unwrap();
        assert_eq!(wards.features.len(), 1);
        let props = wards.features[0].properties.as_ref().unwrap();
        assert_eq!(props["full_name"], json!("大阪府 > 大阪市 > 北区"));
        assert_eq!(props["id"], json!(ids.ward));

        let hits = svc.search("大阪", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].level, 0);
        assert!(svc.search("   ", 10).await.unwrap().is_empty());
    }

    struct FixedGeocoder(Option<Coordinate>);

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Option<Coordinate>, GeocodeError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn address_detection_goes_through_the_geocoder() {
        let (svc, ids) = seeded().await;
        assert!(matches!(
            svc.detect_area_from_address("大阪市北区梅田").await,
            Err(AreaError::Geocode(GeocodeError::MissingApiKey))
        ));

        let svc = svc.with_geocoder(Arc::new(FixedGeocoder(Some(Coordinate::new(34.7, 135.5)))));
        let found = svc.detect_area_from_address("大阪市北区梅田").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(ids.ward));

        let svc = svc.with_geocoder(Arc::new(FixedGeocoder(None)));
        assert!(svc.detect_area_from_address("nowhere").await.unwrap().is_none());
    }
}
