use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-server traffic rollup, overwritten each accounting cycle.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "server_traffic")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub server_id: i32,
    pub total_traffic: i64,
    pub remaining_traffic: i64,
    pub traffic_limit: i64,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::servers::Entity",
        from = "Column::ServerId",
        to = "super::servers::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Server,
}

impl ActiveModelBehavior for ActiveModel {}
