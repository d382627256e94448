use crate::api::error::AppError;
use crate::entities::serial_numbers;
use crate::services::serial::SerialService;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct GenerateSerialRequest {
    pub count: i32,
    pub valid_days: i32,
    /// Leading digits of the prefix encode the rental duration in days.
    #[validate(length(min = 1, max = 16))]
    pub prefix: String,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateSerialResponse {
    pub success: bool,
    pub serial_numbers: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CheckSerialResponse {
    pub success: bool,
    pub serial_code: String,
    pub status: String,
    pub duration_days: i32,
    pub created_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
    pub expired: bool,
}

/// Source address for rate limiting: the proxy-injected header when present,
/// otherwise a shared bucket.
fn source_addr(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[utoipa::path(
    post,
    path = "/serial/generate",
    request_body = GenerateSerialRequest,
    responses(
        (status = 201, description = "Codes generated", body = GenerateSerialResponse),
        (status = 400, description = "Invalid parameters"),
        (status = 403, description = "Admin only")
    ),
    security(("jwt" = []))
)]
pub async fn generate_serial(
    State(state): State<crate::AppState>,
    Json(payload): Json<GenerateSerialRequest>,
) -> Result<(StatusCode, Json<GenerateSerialResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let codes =
        SerialService::generate(&state.db, payload.count, payload.valid_days, &payload.prefix)
            .await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateSerialResponse {
            success: true,
            serial_numbers: codes,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/serial/check/{code}",
    params(("code" = String, Path, description = "Serial code")),
    responses(
        (status = 200, description = "Code status", body = CheckSerialResponse),
        (status = 403, description = "Rate limited"),
        (status = 404, description = "Unknown code")
    )
)]
pub async fn check_serial(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<CheckSerialResponse>, AppError> {
    let addr = source_addr(&headers);
    if !state.check_limiter.allow(&addr) {
        return Err(AppError::RateLimited(
            "Too many serial checks from this address".to_string(),
        ));
    }

    let serial = match SerialService::check(&state.db, &code).await {
        Ok(serial) => serial,
        Err(e @ AppError::NotFound(_)) => {
            state.check_limiter.record_failure(&addr);
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    Ok(Json(to_check_response(serial)))
}

fn to_check_response(serial: serial_numbers::Model) -> CheckSerialResponse {
    CheckSerialResponse {
        success: true,
        expired: serial.expires_at < Utc::now(),
        serial_code: serial.code,
        status: serial.status,
        duration_days: serial.duration_days,
        created_at: serial.created_at,
        expires_at: serial.expires_at,
    }
}
