use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "areas")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    #[sea_orm(nullable)]
    pub name_kana: Option<String>,
    pub area_type: String, // prefecture / city / ward / district / neighborhood / custom
    pub level: i32,
    #[sea_orm(nullable)]
    pub parent_id: Option<i32>,

    // GeoJSON 几何文本
    #[sea_orm(column_type = "Text", nullable)]
    pub geometry: Option<String>,
    #[sea_orm(nullable)]
    pub center_lat: Option<f64>,
    #[sea_orm(nullable)]
    pub center_lon: Option<f64>,

    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentId",
        to = "Column::Id",
        on_delete = "Cascade"
    )]
    Parent,
    #[sea_orm(has_many = "super::venue::Entity")]
    Venue,
}

impl Related<super::venue::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Venue.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
