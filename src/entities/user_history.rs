use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle history, append-only. Kept across expiry sweeps so the audit
/// trail survives resource reclamation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub rental_id: Option<i32>,
    /// "created", "renewed", "expired"
    pub event: String,
    pub rental_start: DateTimeUtc,
    pub rental_end: DateTimeUtc,
    pub total_traffic: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
