use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rentals")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    /// "active", "pending", "expired", "suspended", "terminated", "canceled".
    /// At most one active rental per user.
    pub status: String,
    pub start_date: DateTimeUtc,
    pub end_date: DateTimeUtc,
    /// Bound server ids as a JSON list. Renewal never changes the bindings.
    pub server_ids: Json,
    /// Bound container ids as a JSON list.
    pub container_ids: Json,
    pub traffic_limit: i64,
    pub traffic_usage: i64,
    pub serial_number_id: i32,
    pub renewal_count: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_EXPIRED: &str = "expired";

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
    #[sea_orm(
        belongs_to = "super::serial_numbers::Entity",
        from = "Column::SerialNumberId",
        to = "super::serial_numbers::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    SerialNumber,
    #[sea_orm(has_many = "super::renewal_records::Entity")]
    RenewalRecords,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::renewal_records::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RenewalRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
