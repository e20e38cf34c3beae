use crate::geometry::codec::stored_as_json;
use crate::geometry::Coordinate;
use crate::storage::entity::area::{
    ActiveModel as AreaActiveModel, Column as AreaColumn, Entity as AreaEntity,
    Model as AreaModel,
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, FromQueryResult,
    NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaKind {
    Prefecture,
    City,
    Ward,
    District,
    Neighborhood,
    Custom,
}

impl AreaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaKind::Prefecture => "prefecture",
            AreaKind::City => "city",
            AreaKind::Ward => "ward",
            AreaKind::District => "district",
            AreaKind::Neighborhood => "neighborhood",
            AreaKind::Custom => "custom",
        }
    }
}

impl fmt::Display for AreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AreaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prefecture" => Ok(AreaKind::Prefecture),
            "city" => Ok(AreaKind::City),
            "ward" => Ok(AreaKind::Ward),
            "district" => Ok(AreaKind::District),
            "neighborhood" => Ok(AreaKind::Neighborhood),
            "custom" => Ok(AreaKind::Custom),
            other => Err(format!("unknown area type: {other}")),
        }
    }
}

/// Read-side view of an `areas` row with the geometry document decoded to
/// JSON and the center split out.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Area {
    pub id: i32,
    pub name: String,
    pub name_kana: Option<String>,
    pub kind: AreaKind,
    pub level: i32,
    pub parent_id: Option<i32>,
    pub geometry: Option<Value>,
    pub center: Option<Coordinate>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<AreaModel> for Area {
    fn from(model: AreaModel) -> Self {
        let center = match (model.center_lat, model.center_lon) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        };
        Self {
            id: model.id,
            kind: model.area_type.parse().unwrap_or(AreaKind::Custom),
            geometry: stored_as_json(model.geometry.as_deref()),
            name: model.name,
            name_kana: model.name_kana,
            level: model.level,
            parent_id: model.parent_id,
            center,
            is_active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Values for a region the importer (or an admin) wants to exist.
#[derive(Debug, Clone)]
pub struct NewArea {
    pub name: String,
    pub name_kana: Option<String>,
    pub kind: AreaKind,
    pub level: i32,
    pub parent_id: Option<i32>,
    pub geometry: Option<String>,
    pub center: Option<Coordinate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// Existing row had no geometry; the computed one was stored.
    GeometryFilled,
    Unchanged,
}

#[derive(Debug, Clone, FromQueryResult)]
pub struct LevelCountRow {
    pub level: i32,
    pub count: i64,
}

pub struct AreaRepository;

impl AreaRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<AreaModel>, sea_orm::DbErr> {
        AreaEntity::find_by_id(id).one(db).await
    }

    /// Natural-key lookup: `(name, level, area_type, parent)`. A null parent
    /// has to be matched with `IS NULL`, not `= NULL`.
    pub async fn find_matching<C: ConnectionTrait>(
        db: &C,
        name: &str,
        level: i32,
        kind: AreaKind,
        parent_id: Option<i32>,
    ) -> Result<Option<AreaModel>, sea_orm::DbErr> {
        let parent_cond = match parent_id {
            Some(pid) => AreaColumn::ParentId.eq(pid),
            None => AreaColumn::ParentId.is_null(),
        };
        AreaEntity::find()
            .filter(AreaColumn::Name.eq(name))
            .filter(AreaColumn::Level.eq(level))
            .filter(AreaColumn::AreaType.eq(kind.as_str()))
            .filter(parent_cond)
            .order_by_asc(AreaColumn::Id)
            .one(db)
            .await
    }

    pub async fn insert<C: ConnectionTrait>(
        db: &C,
        new: &NewArea,
    ) -> Result<AreaModel, sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        let am = AreaActiveModel {
            id: NotSet,
            name: Set(new.name.clone()),
            name_kana: Set(new.name_kana.clone()),
            area_type: Set(new.kind.as_str().to_string()),
            level: Set(new.level),
            parent_id: Set(new.parent_id),
            geometry: Set(new.geometry.clone()),
            center_lat: Set(new.center.map(|c| c.lat)),
            center_lon: Set(new.center.map(|c| c.lon)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        am.insert(db).await
    }

    /// Creates the row when the natural key is absent. An existing row is
    /// left alone except that a missing geometry (and center) is filled in.
    pub async fn upsert<C: ConnectionTrait>(
        db: &C,
        new: &NewArea,
    ) -> Result<(AreaModel, UpsertOutcome), sea_orm::DbErr> {
        let existing =
            Self::find_matching(db, &new.name, new.level, new.kind, new.parent_id).await?;
        let Some(model) = existing else {
            let created = Self::insert(db, new).await?;
            return Ok((created, UpsertOutcome::Created));
        };

        if model.geometry.is_some() || new.geometry.is_none() {
            return Ok((model, UpsertOutcome::Unchanged));
        }

        let fill_center = model.center_lat.is_none() || model.center_lon.is_none();
        let mut am: AreaActiveModel = model.into();
        am.geometry = Set(new.geometry.clone());
        if fill_center {
            am.center_lat = Set(new.center.map(|c| c.lat));
            am.center_lon = Set(new.center.map(|c| c.lon));
        }
        am.updated_at = Set(Utc::now().timestamp());
        let updated = am.update(db).await?;
        Ok((updated, UpsertOutcome::GeometryFilled))
    }

    pub async fn set_active<C: ConnectionTrait>(
        db: &C,
        id: i32,
        active: bool,
    ) -> Result<u64, sea_orm::DbErr> {
        let res = AreaEntity::update_many()
            .col_expr(AreaColumn::IsActive, Expr::value(active))
            .col_expr(AreaColumn::UpdatedAt, Expr::value(Utc::now().timestamp()))
            .filter(AreaColumn::Id.eq(id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Active rows carrying a geometry, coarsest level first.
    pub async fn list_active_with_geometry<C: ConnectionTrait>(
        db: &C,
    ) -> Result<Vec<AreaModel>, sea_orm::DbErr> {
        AreaEntity::find()
            .filter(AreaColumn::IsActive.eq(true))
            .filter(AreaColumn::Geometry.is_not_null())
            .order_by_asc(AreaColumn::Level)
            .order_by_asc(AreaColumn::Id)
            .all(db)
            .await
    }

    /// Active rows with a geometry or a center point; candidates for
    /// proximity queries.
    pub async fn list_active_locatable<C: ConnectionTrait>(
        db: &C,
    ) -> Result<Vec<AreaModel>, sea_orm::DbErr> {
        AreaEntity::find()
            .filter(AreaColumn::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(AreaColumn::Geometry.is_not_null())
                    .add(
                        Condition::all()
                            .add(AreaColumn::CenterLat.is_not_null())
                            .add(AreaColumn::CenterLon.is_not_null()),
                    ),
            )
            .order_by_asc(AreaColumn::Level)
            .order_by_asc(AreaColumn::Id)
            .all(db)
            .await
    }

    pub async fn list_active<C: ConnectionTrait>(
        db: &C,
    ) -> Result<Vec<AreaModel>, sea_orm::DbErr> {
        AreaEntity::find()
            .filter(AreaColumn::IsActive.eq(true))
            .order_by_asc(AreaColumn::Level)
            .order_by_asc(AreaColumn::Name)
            .order_by_asc(AreaColumn::Id)
            .all(db)
            .await
    }

    pub async fn children<C: ConnectionTrait>(
        db: &C,
        parent_id: i32,
    ) -> Result<Vec<AreaModel>, sea_orm::DbErr> {
        AreaEntity::find()
            .filter(AreaColumn::ParentId.eq(parent_id))
            .filter(AreaColumn::IsActive.eq(true))
            .order_by_asc(AreaColumn::Name)
            .order_by_asc(AreaColumn::Id)
            .all(db)
            .await
    }

    /// Root-first chain of parents, excluding the region itself. Stops on a
    /// repeated id so a corrupted edge cannot loop forever.
    pub async fn ancestors<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Vec<AreaModel>, sea_orm::DbErr> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut next = match Self::find_by_id(db, id).await? {
            Some(m) => m.parent_id,
            None => return Ok(chain),
        };
        while let Some(pid) = next {
            if !seen.insert(pid) {
                log::warn!("cycle in area parents at id={pid}");
                break;
            }
            match Self::find_by_id(db, pid).await? {
                Some(parent) => {
                    next = parent.parent_id;
                    chain.push(parent);
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Ids of the region and everything below it.
    pub async fn subtree_ids<C: ConnectionTrait>(
        db: &C,
        root_id: i32,
    ) -> Result<Vec<i32>, sea_orm::DbErr> {
        let mut ids = vec![root_id];
        let mut seen = HashSet::from([root_id]);
        let mut queue = VecDeque::from([root_id]);
        while let Some(id) = queue.pop_front() {
            let kids: Vec<i32> = AreaEntity::find()
                .select_only()
                .column(AreaColumn::Id)
                .filter(AreaColumn::ParentId.eq(id))
                .into_tuple()
                .all(db)
                .await?;
            for kid in kids {
                if seen.insert(kid) {
                    ids.push(kid);
                    queue.push_back(kid);
                }
            }
        }
        Ok(ids)
    }

    pub async fn delete_ids<C: ConnectionTrait>(
        db: &C,
        ids: &[i32],
    ) -> Result<u64, sea_orm::DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }
        // 级联删除的行不计入 rows_affected，先数再删
        let existing = AreaEntity::find()
            .filter(AreaColumn::Id.is_in(ids.to_vec()))
            .count(db)
            .await?;
        AreaEntity::delete_many()
            .filter(AreaColumn::Id.is_in(ids.to_vec()))
            .exec(db)
            .await?;
        Ok(existing)
    }

    /// Number of rows removed, cascaded children included.
    pub async fn delete_all<C: ConnectionTrait>(db: &C) -> Result<u64, sea_orm::DbErr> {
        let existing = AreaEntity::find().count(db).await?;
        AreaEntity::delete_many().exec(db).await?;
        Ok(existing)
    }

    pub async fn count_all<C: ConnectionTrait>(db: &C) -> Result<u64, sea_orm::DbErr> {
        AreaEntity::find().count(db).await
    }

    pub async fn count_with_geometry<C: ConnectionTrait>(db: &C) -> Result<u64, sea_orm::DbErr> {
        AreaEntity::find()
            .filter(AreaColumn::Geometry.is_not_null())
            .count(db)
            .await
    }

    /// Non-root rows whose parent is missing.
    pub async fn count_orphans<C: ConnectionTrait>(db: &C) -> Result<u64, sea_orm::DbErr> {
        let rows: Vec<(i32, i32, Option<i32>)> = AreaEntity::find()
            .select_only()
            .column(AreaColumn::Id)
            .column(AreaColumn::Level)
            .column(AreaColumn::ParentId)
            .into_tuple()
            .all(db)
            .await?;
        let ids: HashSet<i32> = rows.iter().map(|(id, _, _)| *id).collect();
        let orphans = rows
            .iter()
            .filter(|(_, level, _)| *level > 0)
            .filter(|(_, _, parent)| parent.map_or(true, |pid| !ids.contains(&pid)))
            .count();
        Ok(orphans as u64)
    }

    pub async fn counts_by_level<C: ConnectionTrait>(
        db: &C,
    ) -> Result<Vec<LevelCountRow>, sea_orm::DbErr> {
        AreaEntity::find()
            .select_only()
            .column(AreaColumn::Level)
            .column_as(Expr::cust("COUNT(*)"), "count")
            .group_by(AreaColumn::Level)
            .order_by_asc(AreaColumn::Level)
            .into_model::<LevelCountRow>()
            .all(db)
            .await
    }

    /// Active rows whose name or phonetic name contains `query`.
    pub async fn search<C: ConnectionTrait>(
        db: &C,
        query: &str,
        limit: u64,
    ) -> Result<Vec<AreaModel>, sea_orm::DbErr> {
        AreaEntity::find()
            .filter(AreaColumn::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(AreaColumn::Name.contains(query))
                    .add(AreaColumn::NameKana.contains(query)),
            )
            .order_by_asc(AreaColumn::Level)
            .order_by_asc(AreaColumn::Name)
            .order_by_asc(AreaColumn::Id)
            .limit(limit)
            .all(db)
            .await
    }

    /// `id -> (name, parent_id)` for every row; enough to build full names
    /// without loading geometry.
    pub async fn name_links<C: ConnectionTrait>(
        db: &C,
    ) -> Result<HashMap<i32, (String, Option<i32>)>, sea_orm::DbErr> {
        let rows: Vec<(i32, String, Option<i32>)> = AreaEntity::find()
            .select_only()
            .column(AreaColumn::Id)
            .column(AreaColumn::Name)
            .column(AreaColumn::ParentId)
            .into_tuple()
            .all(db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, parent)| (id, (name, parent)))
            .collect())
    }

    pub async fn find_many<C: ConnectionTrait>(
        db: &C,
        ids: &[i32],
    ) -> Result<HashMap<i32, AreaModel>, sea_orm::DbErr> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = AreaEntity::find()
            .filter(AreaColumn::Id.is_in(ids.to_vec()))
            .all(db)
            .await?;
        Ok(rows.into_iter().map(|m| (m.id, m)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::establish_connection;

    fn new_area(name: &str, kind: AreaKind, level: i32, parent_id: Option<i32>) -> NewArea {
        NewArea {
            name: name.to_string(),
            name_kana: None,
            kind,
            level,
            parent_id,
            geometry: None,
            center: None,
        }
    }

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [
            AreaKind::Prefecture,
            AreaKind::City,
            AreaKind::Ward,
            AreaKind::District,
            AreaKind::Neighborhood,
            AreaKind::Custom,
        ] {
            assert_eq!(kind.as_str().parse::<AreaKind>(), Ok(kind));
        }
        assert!("village".parse::<AreaKind>().is_err());
    }

    #[tokio::test]
    async fn upsert_matches_null_parent_and_fills_geometry_once() {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        let bare = new_area("東京都", AreaKind::Prefecture, 0, None);
        let (first, outcome) = AreaRepository::upsert(&db, &bare).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let (again, outcome) = AreaRepository::upsert(&db, &bare).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(again.id, first.id);

        let mut with_geom = bare.clone();
        with_geom.geometry = Some(r#"{"type":"Point","coordinates":[139.0,35.0]}"#.to_string());
        with_geom.center = Some(Coordinate::new(35.0, 139.0));
        let (filled, outcome) = AreaRepository::upsert(&db, &with_geom).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::GeometryFilled);
        assert_eq!(filled.center_lat, Some(35.0));

        let mut other_geom = with_geom.clone();
        other_geom.geometry = Some(r#"{"type":"Point","coordinates":[1.0,1.0]}"#.to_string());
        let (kept, outcome) = AreaRepository::upsert(&db, &other_geom).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(kept.geometry, with_geom.geometry);
        assert_eq!(AreaRepository::count_all(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_name_under_different_parents_is_distinct() {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        let (osaka, _) = AreaRepository::upsert(&db, &new_area("大阪府", AreaKind::Prefecture, 0, None))
            .await
            .unwrap();
        let (sakai, _) =
            AreaRepository::upsert(&db, &new_area("堺市", AreaKind::City, 1, Some(osaka.id)))
                .await
                .unwrap();
        let (osaka_city, _) =
            AreaRepository::upsert(&db, &new_area("大阪市", AreaKind::City, 1, Some(osaka.id)))
                .await
                .unwrap();
        let (a, _) =
            AreaRepository::upsert(&db, &new_area("北区", AreaKind::Ward, 2, Some(osaka_city.id)))
                .await
                .unwrap();
        let (b, _) =
            AreaRepository::upsert(&db, &new_area("北区", AreaKind::Ward, 2, Some(sakai.id)))
                .await
                .unwrap();
        assert_ne!(a.id, b.id);

        let chain = AreaRepository::ancestors(&db, a.id).await.unwrap();
        let names: Vec<_> = chain.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["大阪府", "大阪市"]);

        let subtree = AreaRepository::subtree_ids(&db, osaka.id).await.unwrap();
        assert_eq!(subtree.len(), 5);
        assert_eq!(AreaRepository::count_orphans(&db).await.unwrap(), 0);

        let levels = AreaRepository::counts_by_level(&db).await.unwrap();
        let pairs: Vec<(i32, i64)> = levels.iter().map(|r| (r.level, r.count)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn delete_counts_include_cascaded_rows() {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        let (pref, _) = AreaRepository::upsert(&db, &new_area("大阪府", AreaKind::Prefecture, 0, None))
            .await
            .unwrap();
        let (city, _) =
            AreaRepository::upsert(&db, &new_area("大阪市", AreaKind::City, 1, Some(pref.id)))
                .await
                .unwrap();
        AreaRepository::upsert(&db, &new_area("北区", AreaKind::Ward, 2, Some(city.id)))
            .await
            .unwrap();
        AreaRepository::upsert(&db, &new_area("堺市", AreaKind::City, 1, Some(pref.id)))
            .await
            .unwrap();

        let subtree = AreaRepository::subtree_ids(&db, city.id).await.unwrap();
        assert_eq!(AreaRepository::delete_ids(&db, &subtree).await.unwrap(), 2);
        assert_eq!(AreaRepository::count_all(&db).await.unwrap(), 2);

        assert_eq!(AreaRepository::delete_all(&db).await.unwrap(), 2);
        assert_eq!(AreaRepository::count_all(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_and_children_skip_inactive() {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        let (pref, _) = AreaRepository::upsert(&db, &new_area("福岡県", AreaKind::Prefecture, 0, None))
            .await
            .unwrap();
        let (city, _) =
            AreaRepository::upsert(&db, &new_area("福岡市", AreaKind::City, 1, Some(pref.id)))
                .await
                .unwrap();
        let (town, _) =
            AreaRepository::upsert(&db, &new_area("福津市", AreaKind::City, 1, Some(pref.id)))
                .await
                .unwrap();
        AreaRepository::set_active(&db, town.id, false).await.unwrap();

        let kids = AreaRepository::children(&db, pref.id).await.unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].id, city.id);

        let hits = AreaRepository::search(&db, "福", 10).await.unwrap();
        let names: Vec<_> = hits.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["福岡県", "福岡市"]);
    }
}
