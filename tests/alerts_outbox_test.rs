use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_rental_backend::entities::{prelude::*, *};
use rust_rental_backend::infrastructure::database;
use rust_rental_backend::services::alerts::AlertService;
use rust_rental_backend::services::container_control::NoopControl;
use rust_rental_backend::services::mailer::{Mailer, NoopMailer};
use rust_rental_backend::services::rental::{CreateRentalParams, RentalService};
use rust_rental_backend::services::serial::SerialService;
use rust_rental_backend::utils::keyed_mutex::KeyedMutex;
use sea_orm::{ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;

struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _recipient: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
        anyhow::bail!("relay down")
    }
}

async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

async fn insert_user(db: &DatabaseConnection, username: &str) -> users::Model {
    users::ActiveModel {
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.com")),
        password_hash: Set("x".to_string()),
        role: Set("user".to_string()),
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

#[tokio::test]
async fn outbox_delivery_retries_are_bounded() {
    let db = setup_test_db().await;
    let alerts = AlertService::new(db.clone());

    alerts
        .enqueue_mail("renter@example.com", "Your rental is active", "body")
        .await;

    // Each pass bumps the attempt counter; the row stays pending until the
    // bound is reached, then flips to failed with the error recorded.
    for pass in 1..=3 {
        let delivered = alerts.flush_outbox(&FailingMailer, 3).await.unwrap();
        assert_eq!(delivered, 0);

        let row = MailOutbox::find().one(&db).await.unwrap().unwrap();
        assert_eq!(row.attempts, pass);
        if pass < 3 {
            assert_eq!(row.status, mail_outbox::STATUS_PENDING);
        } else {
            assert_eq!(row.status, mail_outbox::STATUS_FAILED);
            assert!(row.last_error.unwrap().contains("relay down"));
            assert!(row.sent_at.is_none());
        }
    }

    // A failed row is out of the queue: a working mailer no longer sees it.
    let delivered = alerts.flush_outbox(&NoopMailer, 3).await.unwrap();
    assert_eq!(delivered, 0);
    let row = MailOutbox::find().one(&db).await.unwrap().unwrap();
    assert_eq!(row.attempts, 3);
}

#[tokio::test]
async fn outbox_marks_delivered_rows_sent() {
    let db = setup_test_db().await;
    let alerts = AlertService::new(db.clone());

    alerts
        .enqueue_mail("renter@example.com", "Your rental has been renewed", "body")
        .await;

    let delivered = alerts.flush_outbox(&NoopMailer, 3).await.unwrap();
    assert_eq!(delivered, 1);

    let row = MailOutbox::find().one(&db).await.unwrap().unwrap();
    assert_eq!(row.status, mail_outbox::STATUS_SENT);
    assert_eq!(row.attempts, 1);
    assert!(row.sent_at.is_some());
    assert!(row.last_error.is_none());

    // Sent rows are not delivered twice.
    assert_eq!(alerts.flush_outbox(&NoopMailer, 3).await.unwrap(), 0);
}

#[tokio::test]
async fn renewal_reminder_goes_out_once_per_rental() {
    let db = setup_test_db().await;
    let alerts = AlertService::new(db.clone());
    let rentals = RentalService::new(
        db.clone(),
        KeyedMutex::new(),
        alerts.clone(),
        Arc::new(NoopControl),
    );

    let user = insert_user(&db, "renter").await;
    let server = insert_server(&db, "192.0.2.1").await;
    let container = insert_container(&db, server.id, "box-1").await;

    let codes = SerialService::generate(&db, 1, 30, "30").await.unwrap();
    let rental = rentals
        .create_rental(CreateRentalParams {
            serial_code: codes[0].clone(),
            user_id: user.id,
            server_id: server.id,
            container_id: container.id,
            traffic_limit: None,
        })
        .await
        .unwrap();

    // Move the rental inside the reminder horizon.
    let mut aged: rentals::ActiveModel = rental.into();
    aged.end_date = Set(Utc::now() + Duration::days(3));
    aged.update(&db).await.unwrap();

    assert_eq!(rentals.send_renewal_reminders(7).await.unwrap(), 1);

    // A second pass with no state change enqueues nothing further.
    assert_eq!(rentals.send_renewal_reminders(7).await.unwrap(), 0);

    let reminders = MailOutbox::find()
        .filter(mail_outbox::Column::Subject.eq("Your rental is about to expire"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(reminders.len(), 1);

    let alerts_rows = SystemAlerts::find()
        .filter(system_alerts::Column::AlertType.eq("renewal_reminder"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(alerts_rows.len(), 1);
}
