use crate::api::error::AppError;
use crate::services::acl::AclDocument;
use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct AclRequest {
    pub user_id: i32,
}

#[derive(Serialize, ToSchema)]
pub struct AclResponse {
    pub success: bool,
    pub acl: AclDocument,
}

#[utoipa::path(
    post,
    path = "/acl/generate",
    request_body = AclRequest,
    responses(
        (status = 200, description = "ACL document written", body = AclResponse),
        (status = 404, description = "User not found")
    ),
    security(("jwt" = []))
)]
pub async fn generate_acl(
    State(state): State<crate::AppState>,
    Json(payload): Json<AclRequest>,
) -> Result<Json<AclResponse>, AppError> {
    let acl = state.acl.generate(payload.user_id).await?;
    Ok(Json(AclResponse { success: true, acl }))
}

#[utoipa::path(
    post,
    path = "/acl/update",
    request_body = AclRequest,
    responses(
        (status = 200, description = "ACL document rewritten", body = AclResponse),
        (status = 404, description = "No existing ACL document for user")
    ),
    security(("jwt" = []))
)]
pub async fn update_acl(
    State(state): State<crate::AppState>,
    Json(payload): Json<AclRequest>,
) -> Result<Json<AclResponse>, AppError> {
    let acl = state.acl.update(payload.user_id).await?;
    Ok(Json(AclResponse { success: true, acl }))
}

#[utoipa::path(
    get,
    path = "/acl/download/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "Stored ACL file bytes", content_type = "application/json"),
        (status = 404, description = "No ACL file for username")
    ),
    security(("jwt" = []))
)]
pub async fn download_acl(
    State(state): State<crate::AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = state.acl.download(&username).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], bytes))
}
