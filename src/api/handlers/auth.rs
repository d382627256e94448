use crate::api::error::AppError;
use crate::entities::{prelude::*, users};
use crate::utils::auth::{create_jwt, hash_password, verify_password};
use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 80))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub token: Option<String>,
    pub user_id: Option<i32>,
    pub role: Option<String>,
}

#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Username or email taken")
    )
)]
pub async fn register(
    State(state): State<crate::AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let taken = Users::find()
        .filter(
            Condition::any()
                .add(users::Column::Username.eq(&payload.username))
                .add(users::Column::Email.eq(&payload.email)),
        )
        .one(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict(
            "Username or email already registered".to_string(),
        ));
    }

    let user = users::ActiveModel {
        username: Set(payload.username),
        email: Set(payload.email),
        password_hash: Set(hash_password(&payload.password)?),
        role: Set("user".to_string()),
        rental_expiry: Set(None),
        is_banned: Set(false),
        is_verified: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let user = user.insert(&state.db).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            token: None,
            user_id: Some(user.id),
            role: Some(user.role),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Bad credentials"),
        (status = 403, description = "Account banned")
    )
)]
pub async fn login(
    State(state): State<crate::AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = Users::find()
        .filter(users::Column::Username.eq(&payload.username))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid username or password".to_string()))?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(AppError::Unauthorized(
            "Invalid username or password".to_string(),
        ));
    }
    if user.is_banned {
        return Err(AppError::Forbidden("Account is banned".to_string()));
    }

    let token = create_jwt(user.id, &user.role, &state.config.jwt_secret)?;

    Ok(Json(AuthResponse {
        success: true,
        token: Some(token),
        user_id: Some(user.id),
        role: Some(user.role),
    }))
}
