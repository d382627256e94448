use crate::api::error::AppError;
use crate::entities::{prelude::*, serial_numbers};
use crate::services::rental::CreateRentalParams;
use axum::{
    Json,
    extract::{Query, State},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct CreateRentalRequest {
    pub serial_code: String,
    pub user_id: i32,
    pub server_id: i32,
    pub container_id: i32,
    pub traffic_limit: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct RenewRentalRequest {
    pub serial_code: String,
    pub user_id: i32,
}

#[derive(Serialize, ToSchema)]
pub struct RentalResponse {
    pub success: bool,
    pub rental_id: i32,
    pub user_id: i32,
    pub status: String,
    pub start_date: chrono::DateTime<chrono::Utc>,
    pub end_date: chrono::DateTime<chrono::Utc>,
    pub renewal_count: i32,
}

#[derive(Serialize, ToSchema)]
pub struct SweepResponse {
    pub success: bool,
    pub expired: u64,
}

#[derive(Deserialize, ToSchema)]
pub struct RentalStatusQuery {
    pub user_id: i32,
}

#[derive(Serialize, ToSchema)]
pub struct SerialStatusEntry {
    pub serial_code: String,
    pub status: String,
    pub duration_days: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub used_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize, ToSchema)]
pub struct RentalStatusResponse {
    pub success: bool,
    pub user_id: i32,
    pub serials: Vec<SerialStatusEntry>,
}

impl From<crate::entities::rentals::Model> for RentalResponse {
    fn from(rental: crate::entities::rentals::Model) -> Self {
        Self {
            success: true,
            rental_id: rental.id,
            user_id: rental.user_id,
            status: rental.status,
            start_date: rental.start_date,
            end_date: rental.end_date,
            renewal_count: rental.renewal_count,
        }
    }
}

#[utoipa::path(
    post,
    path = "/rental/create",
    request_body = CreateRentalRequest,
    responses(
        (status = 200, description = "Rental created", body = RentalResponse),
        (status = 404, description = "User, serial, server or container not found"),
        (status = 409, description = "Active rental exists or serial consumed")
    ),
    security(("jwt" = []))
)]
pub async fn create_rental(
    State(state): State<crate::AppState>,
    Json(payload): Json<CreateRentalRequest>,
) -> Result<Json<RentalResponse>, AppError> {
    let user_id = payload.user_id;
    let rental = state
        .rentals
        .create_rental(CreateRentalParams {
            serial_code: payload.serial_code,
            user_id: payload.user_id,
            server_id: payload.server_id,
            container_id: payload.container_id,
            traffic_limit: payload.traffic_limit,
        })
        .await?;

    // The committed rental is the source of truth; a stale ACL file only
    // lasts until the next regeneration.
    if let Err(e) = state.acl.generate(user_id).await {
        warn!("⚠️ ACL refresh after rental creation failed: {e}");
    }

    Ok(Json(rental.into()))
}

#[utoipa::path(
    post,
    path = "/rental/renew",
    request_body = RenewRentalRequest,
    responses(
        (status = 200, description = "Rental renewed", body = RentalResponse),
        (status = 404, description = "No active rental for user"),
        (status = 409, description = "Serial already consumed")
    ),
    security(("jwt" = []))
)]
pub async fn renew_rental(
    State(state): State<crate::AppState>,
    Json(payload): Json<RenewRentalRequest>,
) -> Result<Json<RentalResponse>, AppError> {
    let rental = state
        .rentals
        .renew_rental(payload.user_id, &payload.serial_code)
        .await?;

    if let Err(e) = state.acl.generate(payload.user_id).await {
        warn!("⚠️ ACL refresh after renewal failed: {e}");
    }

    Ok(Json(rental.into()))
}

#[utoipa::path(
    get,
    path = "/rental/check_expiry",
    responses((status = 200, description = "Expired rentals swept", body = SweepResponse)),
    security(("jwt" = []))
)]
pub async fn check_expiry(
    State(state): State<crate::AppState>,
) -> Result<Json<SweepResponse>, AppError> {
    let expired = state.rentals.sweep_expired().await?;
    Ok(Json(SweepResponse {
        success: true,
        expired,
    }))
}

#[utoipa::path(
    get,
    path = "/rental/status",
    params(("user_id" = i32, Query, description = "User id")),
    responses((status = 200, description = "User's serials", body = RentalStatusResponse)),
    security(("jwt" = []))
)]
pub async fn rental_status(
    State(state): State<crate::AppState>,
    Query(query): Query<RentalStatusQuery>,
) -> Result<Json<RentalStatusResponse>, AppError> {
    let serials = SerialNumbers::find()
        .filter(serial_numbers::Column::UserId.eq(query.user_id))
        .order_by_desc(serial_numbers::Column::CreatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(RentalStatusResponse {
        success: true,
        user_id: query.user_id,
        serials: serials
            .into_iter()
            .map(|s| SerialStatusEntry {
                serial_code: s.code,
                status: s.status,
                duration_days: s.duration_days,
                created_at: s.created_at,
                expires_at: s.expires_at,
                used_at: s.used_at,
            })
            .collect(),
    }))
}
