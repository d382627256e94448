use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use rust_rental_backend::config::AppConfig;
use rust_rental_backend::entities::{prelude::*, *};
use rust_rental_backend::infrastructure::database;
use rust_rental_backend::services::acl::AclService;
use rust_rental_backend::services::alerts::AlertService;
use rust_rental_backend::services::container_control::NoopControl;
use rust_rental_backend::services::rate_limit::CheckRateLimiter;
use rust_rental_backend::services::rental::{CreateRentalParams, RentalService};
use rust_rental_backend::services::traffic::TrafficService;
use rust_rental_backend::utils::auth::{create_jwt, hash_password};
use rust_rental_backend::utils::keyed_mutex::KeyedMutex;
use rust_rental_backend::{AppState, create_app};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

fn build_state(db: DatabaseConnection, acl_dir: &std::path::Path) -> AppState {
    let config = AppConfig::default();
    let alerts = AlertService::new(db.clone());
    let rentals = Arc::new(RentalService::new(
        db.clone(),
        KeyedMutex::new(),
        alerts.clone(),
        Arc::new(NoopControl),
    ));
    let acl = AclService::new(db.clone(), acl_dir, Arc::new(dashmap::DashMap::new()));
    let check_limiter = CheckRateLimiter::new(
        config.check_rate_per_minute,
        config.check_failures_per_window,
    );

    AppState {
        db: db.clone(),
        config,
        rentals,
        traffic: TrafficService::new(db),
        acl,
        alerts,
        check_limiter,
    }
}

async fn insert_user(db: &DatabaseConnection, username: &str, role: &str) -> users::Model {
    users::ActiveModel {
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.com")),
        password_hash: Set(hash_password("password123").unwrap()),
        role: Set(role.to_string()),
        rental_expiry: Set(None),
        is_banned: Set(false),
        is_verified: Set(true),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

async fn insert_server(db: &DatabaseConnection, ip: &str) -> servers::Model {
    let now = Utc::now();
    servers::ActiveModel {
        ip: Set(ip.to_string()),
        region: Set("eu-west".to_string()),
        status: Set("online".to_string()),
        user_count: Set(0),
        upload_traffic: Set(0),
        download_traffic: Set(0),
        traffic_limit: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

async fn insert_container(
    db: &DatabaseConnection,
    server_id: i32,
    name: &str,
) -> docker_containers::Model {
    docker_containers::ActiveModel {
        server_id: Set(server_id),
        user_id: Set(None),
        name: Set(name.to_string()),
        status: Set(docker_containers::STATUS_STOPPED.to_string()),
        port: Set(10000),
        stun_port: Set(20000),
        upload_traffic: Set(0),
        download_traffic: Set(0),
        traffic_limit: Set(1000),
        remaining_traffic: Set(1000),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

fn token_for(user: &users::Model) -> String {
    create_jwt(user.id, &user.role, "secret").unwrap()
}

async fn post_json(app: &axum::Router, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("Authorization", format!("Bearer {token}"))
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn generate_serials(
    app: &axum::Router,
    admin_token: &str,
    count: i32,
    valid_days: i32,
    prefix: &str,
) -> Vec<String> {
    let (status, body) = post_json(
        app,
        "/serial/generate",
        admin_token,
        json!({ "count": count, "valid_days": valid_days, "prefix": prefix }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["serial_numbers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn serial_generate_and_check_flow() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let state = build_state(db.clone(), acl_dir.path());
    let app = create_app(state);

    let admin = insert_user(&db, "admin", "admin").await;
    let codes = generate_serials(&app, &token_for(&admin), 2, 30, "90").await;

    assert_eq!(codes.len(), 2);
    for code in &codes {
        assert!(code.starts_with("90"));
        assert_eq!(code.len(), "90".len() + 6);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/serial/check/{}", codes[0]))
                .header("x-forwarded-for", "10.0.0.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "unused");
    assert_eq!(body["duration_days"], 30);
    assert_eq!(body["expired"], false);
}

#[tokio::test]
async fn serial_generate_requires_admin() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let app = create_app(build_state(db.clone(), acl_dir.path()));

    let user = insert_user(&db, "renter", "user").await;
    let (status, body) = post_json(
        &app,
        "/serial/generate",
        &token_for(&user),
        json!({ "count": 1, "valid_days": 30, "prefix": "90" }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    // Rejections carry the uniform envelope, not an empty body.
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("Admin"));
}

#[tokio::test]
async fn missing_token_is_rejected_with_envelope() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let app = create_app(build_state(db.clone(), acl_dir.path()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/rental/status?user_id=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Missing bearer token");
}

#[tokio::test]
async fn serial_check_locks_out_after_repeated_failures() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let app = create_app(build_state(db.clone(), acl_dir.path()));

    for attempt in 0..6 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/serial/check/90UNKNOWN")
                    .header("x-forwarded-for", "10.0.0.2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        if attempt < 5 {
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        } else {
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }
}

#[tokio::test]
async fn rental_create_and_renew_flow() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let app = create_app(build_state(db.clone(), acl_dir.path()));

    let admin = insert_user(&db, "admin", "admin").await;
    let renter = insert_user(&db, "renter", "user").await;
    let server = insert_server(&db, "192.0.2.1").await;
    let container = insert_container(&db, server.id, "box-1").await;

    let admin_token = token_for(&admin);
    // The code prefix carries the rental duration; valid_days only ages the
    // code itself.
    let s180 = generate_serials(&app, &admin_token, 1, 30, "180").await[0].clone();
    let s90 = generate_serials(&app, &admin_token, 2, 30, "90").await;

    let renter_token = token_for(&renter);
    let (status, body) = post_json(
        &app,
        "/rental/create",
        &renter_token,
        json!({
            "serial_code": s180,
            "user_id": renter.id,
            "server_id": server.id,
            "container_id": container.id,
            "traffic_limit": 5000
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["renewal_count"], 0);
    assert_eq!(body["success"], true);
    let start: chrono::DateTime<Utc> = body["start_date"].as_str().unwrap().parse().unwrap();
    let end: chrono::DateTime<Utc> = body["end_date"].as_str().unwrap().parse().unwrap();
    assert_eq!((end - start).num_days(), 180);

    // Bindings took effect.
    let container = DockerContainers::find_by_id(container.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(container.user_id, Some(renter.id));
    assert_eq!(container.status, docker_containers::STATUS_RUNNING);

    let server = Servers::find_by_id(server.id).one(&db).await.unwrap().unwrap();
    assert_eq!(server.user_count, 1);

    let renter_row = Users::find_by_id(renter.id).one(&db).await.unwrap().unwrap();
    assert_eq!(renter_row.rental_expiry, Some(end));

    // A second active rental for the same user is refused.
    let (status, _) = post_json(
        &app,
        "/rental/create",
        &renter_token,
        json!({
            "serial_code": s90[0],
            "user_id": renter.id,
            "server_id": server.id,
            "container_id": container.id
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The invariant holds: one active rental row for the user.
    let active = Rentals::find()
        .filter(rentals::Column::UserId.eq(renter.id))
        .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);

    // Renewal extends from the old end date.
    let (status, body) = post_json(
        &app,
        "/rental/renew",
        &renter_token,
        json!({ "serial_code": s90[0], "user_id": renter.id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["renewal_count"], 1);
    let new_end: chrono::DateTime<Utc> = body["end_date"].as_str().unwrap().parse().unwrap();
    assert_eq!(new_end, end + Duration::days(90));

    let renter_row = Users::find_by_id(renter.id).one(&db).await.unwrap().unwrap();
    assert_eq!(renter_row.rental_expiry, Some(new_end));

    let rental_id = body["rental_id"].as_i64().unwrap() as i32;
    let records = RenewalRecords::find()
        .filter(renewal_records::Column::RentalId.eq(rental_id))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].days_added, 90);

    // A consumed serial cannot renew again.
    let (status, _) = post_json(
        &app,
        "/rental/renew",
        &renter_token,
        json!({ "serial_code": s90[0], "user_id": renter.id }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn consumed_serial_cannot_start_second_rental() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let state = build_state(db.clone(), acl_dir.path());

    let alice = insert_user(&db, "alice", "user").await;
    let bob = insert_user(&db, "bob", "user").await;
    let server = insert_server(&db, "192.0.2.2").await;
    let container_a = insert_container(&db, server.id, "box-a").await;
    let container_b = insert_container(&db, server.id, "box-b").await;

    let codes = rust_rental_backend::services::serial::SerialService::generate(&db, 1, 30, "30")
        .await
        .unwrap();

    state
        .rentals
        .create_rental(CreateRentalParams {
            serial_code: codes[0].clone(),
            user_id: alice.id,
            server_id: server.id,
            container_id: container_a.id,
            traffic_limit: None,
        })
        .await
        .unwrap();

    let err = state
        .rentals
        .create_rental(CreateRentalParams {
            serial_code: codes[0].clone(),
            user_id: bob.id,
            server_id: server.id,
            container_id: container_b.id,
            traffic_limit: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        rust_rental_backend::api::error::AppError::Conflict(_)
    ));
}

#[tokio::test]
async fn sweep_expires_rentals_exactly_once() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let state = build_state(db.clone(), acl_dir.path());

    let renter = insert_user(&db, "renter", "user").await;
    let server = insert_server(&db, "192.0.2.3").await;
    let container = insert_container(&db, server.id, "box-1").await;

    let codes = rust_rental_backend::services::serial::SerialService::generate(&db, 1, 30, "30")
        .await
        .unwrap();
    let rental = state
        .rentals
        .create_rental(CreateRentalParams {
            serial_code: codes[0].clone(),
            user_id: renter.id,
            server_id: server.id,
            container_id: container.id,
            traffic_limit: None,
        })
        .await
        .unwrap();

    // Age the rental past its end date.
    let mut aged: rentals::ActiveModel = rental.into();
    aged.end_date = Set(Utc::now() - Duration::days(1));
    aged.update(&db).await.unwrap();

    assert_eq!(state.rentals.sweep_expired().await.unwrap(), 1);

    let container = DockerContainers::find_by_id(container.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(container.user_id, None);
    assert_eq!(container.status, docker_containers::STATUS_STOPPED);

    let server = Servers::find_by_id(server.id).one(&db).await.unwrap().unwrap();
    assert_eq!(server.user_count, 0);

    let renter_row = Users::find_by_id(renter.id).one(&db).await.unwrap().unwrap();
    assert_eq!(renter_row.rental_expiry, None);

    assert!(
        UserContainers::find()
            .filter(user_containers::Column::UserId.eq(renter.id))
            .all(&db)
            .await
            .unwrap()
            .is_empty()
    );

    // The history row is archival.
    let history = UserHistory::find()
        .filter(user_history::Column::UserId.eq(renter.id))
        .filter(user_history::Column::Event.eq("expired"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    // A second sweep with nothing to do mutates nothing.
    assert_eq!(state.rentals.sweep_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn check_expiry_endpoint_triggers_sweep() {
    let db = setup_test_db().await;
    let acl_dir = tempfile::tempdir().unwrap();
    let state = build_state(db.clone(), acl_dir.path());
    let app = create_app(state.clone());

    let renter = insert_user(&db, "renter", "user").await;
    let server = insert_server(&db, "192.0.2.4").await;
    let container = insert_container(&db, server.id, "box-1").await;

    let codes = rust_rental_backend::services::serial::SerialService::generate(&db, 1, 30, "30")
        .await
        .unwrap();
    let rental = state
        .rentals
        .create_rental(CreateRentalParams {
            serial_code: codes[0].clone(),
            user_id: renter.id,
            server_id: server.id,
            container_id: container.id,
            traffic_limit: None,
        })
        .await
        .unwrap();

    let mut aged: rentals::ActiveModel = rental.into();
    aged.end_date = Set(Utc::now() - Duration::days(1));
    aged.update(&db).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/rental/check_expiry")
                .header("Authorization", format!("Bearer {}", token_for(&renter)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["expired"], 1);
}
