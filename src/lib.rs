pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::acl::AclService;
use crate::services::alerts::AlertService;
use crate::services::rate_limit::CheckRateLimiter;
use crate::services::rental::RentalService;
use crate::services::traffic::TrafficService;
use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::health::health_check,
        api::handlers::serial::generate_serial,
        api::handlers::serial::check_serial,
        api::handlers::rental::create_rental,
        api::handlers::rental::renew_rental,
        api::handlers::rental::check_expiry,
        api::handlers::rental::rental_status,
        api::handlers::traffic::traffic_stats,
        api::handlers::acl::generate_acl,
        api::handlers::acl::update_acl,
        api::handlers::acl::download_acl,
        api::handlers::servers::add_server,
        api::handlers::servers::server_load,
        api::handlers::servers::add_container,
        api::handlers::alerts::realtime_alerts,
        api::handlers::alerts::add_alert,
        api::handlers::alerts::resolve_alert,
        api::handlers::system::system_overview,
    ),
    components(
        schemas(
            api::handlers::auth::RegisterRequest,
            api::handlers::auth::LoginRequest,
            api::handlers::auth::AuthResponse,
            api::handlers::health::HealthResponse,
            api::handlers::serial::GenerateSerialRequest,
            api::handlers::serial::GenerateSerialResponse,
            api::handlers::serial::CheckSerialResponse,
            api::handlers::rental::CreateRentalRequest,
            api::handlers::rental::RenewRentalRequest,
            api::handlers::rental::RentalResponse,
            api::handlers::rental::SweepResponse,
            api::handlers::rental::RentalStatusResponse,
            api::handlers::rental::SerialStatusEntry,
            api::handlers::traffic::TrafficStatsRequest,
            api::handlers::traffic::TrafficStatsResponse,
            api::handlers::acl::AclRequest,
            api::handlers::acl::AclResponse,
            api::handlers::servers::AddServerRequest,
            api::handlers::servers::AddContainerRequest,
            api::handlers::servers::AddedResponse,
            api::handlers::servers::ServerLoadEntry,
            api::handlers::servers::ServerLoadResponse,
            api::handlers::alerts::AddAlertRequest,
            api::handlers::alerts::AlertEntry,
            api::handlers::alerts::AlertListResponse,
            api::handlers::alerts::AlertAckResponse,
            api::handlers::system::SystemOverviewResponse,
            services::acl::AclDocument,
            services::acl::AclServerEntry,
        )
    ),
    tags(
        (name = "auth", description = "Authentication endpoints"),
        (name = "serial", description = "Serial number registry"),
        (name = "rental", description = "Rental lifecycle"),
        (name = "traffic", description = "Traffic accounting"),
        (name = "acl", description = "Per-user ACL distribution"),
        (name = "admin", description = "Inventory and alert administration")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub rentals: Arc<RentalService>,
    pub traffic: TrafficService,
    pub acl: AclService,
    pub alerts: AlertService,
    pub check_limiter: CheckRateLimiter,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/register", post(api::handlers::auth::register))
        .route("/login", post(api::handlers::auth::login))
        // Public, but rate limited per source address.
        .route(
            "/serial/check/:code",
            get(api::handlers::serial::check_serial),
        )
        .route(
            "/serial/generate",
            post(api::handlers::serial::generate_serial)
                .layer(from_fn(api::middleware::auth::require_admin))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/rental/create",
            post(api::handlers::rental::create_rental).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/rental/renew",
            post(api::handlers::rental::renew_rental).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/rental/check_expiry",
            get(api::handlers::rental::check_expiry).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/rental/status",
            get(api::handlers::rental::rental_status).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/traffic/stats",
            post(api::handlers::traffic::traffic_stats).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/acl/generate",
            post(api::handlers::acl::generate_acl).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/acl/update",
            post(api::handlers::acl::update_acl).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/acl/download/:username",
            get(api::handlers::acl::download_acl).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/servers/add",
            post(api::handlers::servers::add_server)
                .layer(from_fn(api::middleware::auth::require_admin))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/servers/load",
            get(api::handlers::servers::server_load).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/containers/add",
            post(api::handlers::servers::add_container)
                .layer(from_fn(api::middleware::auth::require_admin))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/alerts/realtime",
            get(api::handlers::alerts::realtime_alerts).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/alerts/add",
            post(api::handlers::alerts::add_alert)
                .layer(from_fn(api::middleware::auth::require_admin))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/alerts/resolve/:id",
            post(api::handlers::alerts::resolve_alert)
                .layer(from_fn(api::middleware::auth::require_admin))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/system/overview",
            get(api::handlers::system::system_overview).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
