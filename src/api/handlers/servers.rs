use crate::api::error::AppError;
use crate::entities::{docker_containers, prelude::*, servers};
use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct AddServerRequest {
    #[validate(length(min = 7, max = 45))]
    pub ip: String,
    #[validate(length(min = 1, max = 64))]
    pub region: String,
    pub traffic_limit: Option<i64>,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct AddContainerRequest {
    pub server_id: i32,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    pub port: i32,
    pub stun_port: i32,
    pub traffic_limit: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct AddedResponse {
    pub success: bool,
    pub id: i32,
}

#[derive(Serialize, ToSchema)]
pub struct ServerLoadEntry {
    pub id: i32,
    pub ip: String,
    pub region: String,
    pub status: String,
    pub user_count: i32,
}

#[derive(Serialize, ToSchema)]
pub struct ServerLoadResponse {
    pub success: bool,
    pub servers: Vec<ServerLoadEntry>,
}

#[utoipa::path(
    post,
    path = "/servers/add",
    request_body = AddServerRequest,
    responses(
        (status = 201, description = "Server registered", body = AddedResponse),
        (status = 409, description = "IP already registered")
    ),
    security(("jwt" = []))
)]
pub async fn add_server(
    State(state): State<crate::AppState>,
    Json(payload): Json<AddServerRequest>,
) -> Result<(StatusCode, Json<AddedResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let taken = Servers::find()
        .filter(servers::Column::Ip.eq(payload.ip.as_str()))
        .one(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!(
            "Server with IP {} already registered",
            payload.ip
        )));
    }

    let now = Utc::now();
    let server = servers::ActiveModel {
        ip: Set(payload.ip),
        region: Set(payload.region),
        status: Set("online".to_string()),
        user_count: Set(0),
        upload_traffic: Set(0),
        download_traffic: Set(0),
        traffic_limit: Set(payload.traffic_limit.unwrap_or(0)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AddedResponse {
            success: true,
            id: server.id,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/servers/load",
    responses((status = 200, description = "Per-server load", body = ServerLoadResponse)),
    security(("jwt" = []))
)]
pub async fn server_load(
    State(state): State<crate::AppState>,
) -> Result<Json<ServerLoadResponse>, AppError> {
    let servers = Servers::find().all(&state.db).await?;
    Ok(Json(ServerLoadResponse {
        success: true,
        servers: servers
            .into_iter()
            .map(|s| ServerLoadEntry {
                id: s.id,
                ip: s.ip,
                region: s.region,
                status: s.status,
                user_count: s.user_count,
            })
            .collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/containers/add",
    request_body = AddContainerRequest,
    responses(
        (status = 201, description = "Container registered", body = AddedResponse),
        (status = 404, description = "Server not found"),
        (status = 409, description = "Container name already registered")
    ),
    security(("jwt" = []))
)]
pub async fn add_container(
    State(state): State<crate::AppState>,
    Json(payload): Json<AddContainerRequest>,
) -> Result<(StatusCode, Json<AddedResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    Servers::find_by_id(payload.server_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {} not found", payload.server_id)))?;

    let taken = DockerContainers::find()
        .filter(docker_containers::Column::Name.eq(payload.name.as_str()))
        .one(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!(
            "Container {} already registered",
            payload.name
        )));
    }

    let limit = payload.traffic_limit.unwrap_or(0);
    let container = docker_containers::ActiveModel {
        server_id: Set(payload.server_id),
        user_id: Set(None),
        name: Set(payload.name),
        status: Set(docker_containers::STATUS_STOPPED.to_string()),
        port: Set(payload.port),
        stun_port: Set(payload.stun_port),
        upload_traffic: Set(0),
        download_traffic: Set(0),
        traffic_limit: Set(limit),
        remaining_traffic: Set(limit),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AddedResponse {
            success: true,
            id: container.id,
        }),
    ))
}
