use crate::storage::entity::venue::{
    ActiveModel as VenueActiveModel, Column as VenueColumn, Entity as VenueEntity,
    Model as VenueModel,
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, NotSet,
    QueryFilter, QueryOrder, QuerySelect, Set,
};

#[derive(Debug, Clone, FromQueryResult)]
pub struct VenueCountRow {
    pub area_id: i32,
    pub count: i64,
}

pub struct VenueRepository;

impl VenueRepository {
    pub async fn insert<C: ConnectionTrait>(
        db: &C,
        name: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<VenueModel, sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        let am = VenueActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            latitude: Set(latitude),
            longitude: Set(longitude),
            area_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        am.insert(db).await
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<VenueModel>, sea_orm::DbErr> {
        VenueEntity::find_by_id(id).one(db).await
    }

    /// Venues not yet linked to any area.
    pub async fn unassigned<C: ConnectionTrait>(db: &C) -> Result<Vec<VenueModel>, sea_orm::DbErr> {
        VenueEntity::find()
            .filter(VenueColumn::AreaId.is_null())
            .order_by_asc(VenueColumn::Id)
            .all(db)
            .await
    }

    pub async fn set_area<C: ConnectionTrait>(
        db: &C,
        venue_id: i32,
        area_id: Option<i32>,
    ) -> Result<u64, sea_orm::DbErr> {
        let res = VenueEntity::update_many()
            .col_expr(VenueColumn::AreaId, Expr::value(area_id))
            .col_expr(VenueColumn::UpdatedAt, Expr::value(Utc::now().timestamp()))
            .filter(VenueColumn::Id.eq(venue_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn clear_all_area_refs<C: ConnectionTrait>(db: &C) -> Result<u64, sea_orm::DbErr> {
        let res = VenueEntity::update_many()
            .col_expr(VenueColumn::AreaId, Expr::value(Option::<i32>::None))
            .filter(VenueColumn::AreaId.is_not_null())
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn clear_area_refs_in<C: ConnectionTrait>(
        db: &C,
        area_ids: &[i32],
    ) -> Result<u64, sea_orm::DbErr> {
        if area_ids.is_empty() {
            return Ok(0);
        }
        let res = VenueEntity::update_many()
            .col_expr(VenueColumn::AreaId, Expr::value(Option::<i32>::None))
            .filter(VenueColumn::AreaId.is_in(area_ids.to_vec()))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Venue count per referenced area, largest first.
    pub async fn counts_by_area<C: ConnectionTrait>(
        db: &C,
    ) -> Result<Vec<VenueCountRow>, sea_orm::DbErr> {
        VenueEntity::find()
            .select_only()
            .column(VenueColumn::AreaId)
            .column_as(Expr::cust("COUNT(*)"), "count")
            .filter(VenueColumn::AreaId.is_not_null())
            .group_by(VenueColumn::AreaId)
            .order_by_desc(Expr::cust("COUNT(*)"))
            .order_by_asc(VenueColumn::AreaId)
            .into_model::<VenueCountRow>()
            .all(db)
            .await
    }
}
