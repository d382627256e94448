use crate::api::error::AppError;
use crate::services::alerts::AlertType;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct AddAlertRequest {
    #[validate(length(min = 1, max = 512))]
    pub message: String,
    pub user_id: Option<i32>,
    pub server_id: Option<i32>,
}

#[derive(Serialize, ToSchema)]
pub struct AlertEntry {
    pub id: i32,
    pub alert_type: String,
    pub message: String,
    pub user_id: Option<i32>,
    pub server_id: Option<i32>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct AlertListResponse {
    pub success: bool,
    pub alerts: Vec<AlertEntry>,
}

#[derive(Serialize, ToSchema)]
pub struct AlertAckResponse {
    pub success: bool,
}

#[utoipa::path(
    get,
    path = "/alerts/realtime",
    responses((status = 200, description = "Active alerts", body = AlertListResponse)),
    security(("jwt" = []))
)]
pub async fn realtime_alerts(
    State(state): State<crate::AppState>,
) -> Result<Json<AlertListResponse>, AppError> {
    let alerts = state.alerts.active_alerts().await?;
    Ok(Json(AlertListResponse {
        success: true,
        alerts: alerts
            .into_iter()
            .map(|a| AlertEntry {
                id: a.id,
                alert_type: a.alert_type,
                message: a.message,
                user_id: a.user_id,
                server_id: a.server_id,
                status: a.status,
                created_at: a.created_at,
            })
            .collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/alerts/add",
    request_body = AddAlertRequest,
    responses(
        (status = 201, description = "Alert created", body = AlertAckResponse),
        (status = 403, description = "Admin only")
    ),
    security(("jwt" = []))
)]
pub async fn add_alert(
    State(state): State<crate::AppState>,
    Json(payload): Json<AddAlertRequest>,
) -> Result<(StatusCode, Json<AlertAckResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    state
        .alerts
        .raise(
            AlertType::General,
            payload.user_id,
            payload.server_id,
            &payload.message,
        )
        .await;

    Ok((StatusCode::CREATED, Json(AlertAckResponse { success: true })))
}

#[utoipa::path(
    post,
    path = "/alerts/resolve/{id}",
    params(("id" = i32, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert resolved", body = AlertAckResponse),
        (status = 404, description = "Alert not found")
    ),
    security(("jwt" = []))
)]
pub async fn resolve_alert(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
) -> Result<Json<AlertAckResponse>, AppError> {
    state.alerts.resolve(id).await?;
    Ok(Json(AlertAckResponse { success: true }))
}
