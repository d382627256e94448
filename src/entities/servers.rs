use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "servers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub ip: String,
    pub region: String,
    /// "online", "offline" or "error"
    pub status: String,
    /// Number of rentals currently bound to this server.
    pub user_count: i32,
    pub upload_traffic: i64,
    pub download_traffic: i64,
    pub traffic_limit: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::docker_containers::Entity")]
    DockerContainers,
    #[sea_orm(has_many = "super::system_alerts::Entity")]
    SystemAlerts,
}

impl Related<super::docker_containers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DockerContainers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
