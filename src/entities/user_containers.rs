use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Current binding of a user to a container. `expiry_date` mirrors the owning
/// rental's end date; downstream traffic/ACL lookups read it instead of
/// traversing the rental.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_containers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub container_id: i32,
    pub server_id: i32,
    pub expiry_date: DateTimeUtc,
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
    #[sea_orm(
        belongs_to = "super::docker_containers::Entity",
        from = "Column::ContainerId",
        to = "super::docker_containers::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Container,
    #[sea_orm(
        belongs_to = "super::servers::Entity",
        from = "Column::ServerId",
        to = "super::servers::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Server,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
