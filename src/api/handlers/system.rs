use crate::api::error::AppError;
use crate::entities::{docker_containers, prelude::*, rentals, system_alerts};
use axum::{Json, extract::State};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct SystemOverviewResponse {
    pub success: bool,
    pub users: u64,
    pub servers: u64,
    pub containers: u64,
    pub running_containers: u64,
    pub active_rentals: u64,
    pub active_alerts: u64,
}

#[utoipa::path(
    get,
    path = "/system/overview",
    responses((status = 200, description = "Entity counts", body = SystemOverviewResponse)),
    security(("jwt" = []))
)]
pub async fn system_overview(
    State(state): State<crate::AppState>,
) -> Result<Json<SystemOverviewResponse>, AppError> {
    let users = Users::find().count(&state.db).await?;
    let servers = Servers::find().count(&state.db).await?;
    let containers = DockerContainers::find().count(&state.db).await?;
    let running_containers = DockerContainers::find()
        .filter(docker_containers::Column::Status.eq(docker_containers::STATUS_RUNNING))
        .count(&state.db)
        .await?;
    let active_rentals = Rentals::find()
        .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
        .count(&state.db)
        .await?;
    let active_alerts = SystemAlerts::find()
        .filter(system_alerts::Column::Status.eq(system_alerts::STATUS_ACTIVE))
        .count(&state.db)
        .await?;

    Ok(Json(SystemOverviewResponse {
        success: true,
        users,
        servers,
        containers,
        running_containers,
        active_rentals,
        active_alerts,
    }))
}
