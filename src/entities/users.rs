use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    #[sea_orm(unique)]
    pub email: String,
    pub password_hash: String,
    /// "user", "admin" or "distributor"
    pub role: String,
    /// Cached copy of the active rental's end date. Written only in the same
    /// transaction as the rental row it mirrors.
    pub rental_expiry: Option<DateTimeUtc>,
    pub is_banned: bool,
    pub is_verified: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::rentals::Entity")]
    Rentals,
    #[sea_orm(has_many = "super::serial_numbers::Entity")]
    SerialNumbers,
    #[sea_orm(has_many = "super::user_containers::Entity")]
    UserContainers,
    #[sea_orm(has_many = "super::user_history::Entity")]
    UserHistory,
}

impl Related<super::rentals::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rentals.def()
    }
}

impl Related<super::serial_numbers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SerialNumbers.def()
    }
}

impl Related<super::user_containers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserContainers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
