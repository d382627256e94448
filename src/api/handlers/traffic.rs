use crate::api::error::AppError;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct TrafficStatsRequest {
    pub user_id: Option<i32>,
    pub server_id: Option<i32>,
}

#[derive(Serialize, ToSchema)]
pub struct TrafficStatsResponse {
    pub success: bool,
    pub total_traffic: i64,
    pub remaining_traffic: i64,
    pub traffic_limit: i64,
}

#[utoipa::path(
    post,
    path = "/traffic/stats",
    request_body = TrafficStatsRequest,
    responses(
        (status = 200, description = "Recomputed rollup", body = TrafficStatsResponse),
        (status = 400, description = "Neither user_id nor server_id given")
    ),
    security(("jwt" = []))
)]
pub async fn traffic_stats(
    State(state): State<crate::AppState>,
    Json(payload): Json<TrafficStatsRequest>,
) -> Result<Json<TrafficStatsResponse>, AppError> {
    let summary = match (payload.user_id, payload.server_id) {
        (Some(user_id), _) => state.traffic.refresh_user_rollup(user_id).await?,
        (None, Some(server_id)) => state.traffic.refresh_server_rollup(server_id).await?,
        (None, None) => {
            return Err(AppError::InvalidInput(
                "user_id or server_id is required".to_string(),
            ));
        }
    };

    Ok(Json(TrafficStatsResponse {
        success: true,
        total_traffic: summary.total_traffic,
        remaining_traffic: summary.remaining_traffic,
        traffic_limit: summary.traffic_limit,
    }))
}
