use crate::api::error::AppError;
use crate::entities::{
    docker_containers, prelude::*, renewal_records, rentals, servers, user_containers,
    user_history, user_servers, user_traffic, users,
};
use crate::services::alerts::{AlertService, AlertType};
use crate::services::container_control::ContainerControl;
use crate::services::serial::SerialService;
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::serial_code;
use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const SWEEP_BATCH: u64 = 1000;

#[derive(Debug, Clone)]
pub struct CreateRentalParams {
    pub serial_code: String,
    pub user_id: i32,
    pub server_id: i32,
    pub container_id: i32,
    pub traffic_limit: Option<i64>,
}

/// Orchestrates the per-user rental state machine:
/// NONE -> ACTIVE -> (RENEWED)* -> EXPIRED. Each transition commits as one
/// transaction; side effects (container control, mail, ACL refresh) run after
/// the commit and never roll it back.
pub struct RentalService {
    db: DatabaseConnection,
    user_locks: KeyedMutex,
    alerts: AlertService,
    control: Arc<dyn ContainerControl>,
}

impl RentalService {
    pub fn new(
        db: DatabaseConnection,
        user_locks: KeyedMutex,
        alerts: AlertService,
        control: Arc<dyn ContainerControl>,
    ) -> Self {
        Self {
            db,
            user_locks,
            alerts,
            control,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Drops idle per-user lock entries. Driven by the background worker.
    pub fn cleanup_locks(&self) {
        self.user_locks.cleanup();
    }

    /// NONE -> ACTIVE. Consumes the serial, creates the rental row, binds the
    /// container, bumps the server's user count and mirrors the expiry into
    /// the user and user_containers rows, all in one transaction. The
    /// per-user lock plus the in-transaction recheck close the window for two
    /// concurrent activations producing two active rentals.
    pub async fn create_rental(
        &self,
        params: CreateRentalParams,
    ) -> Result<rentals::Model, AppError> {
        let days = serial_code::parse_duration_days(&params.serial_code).ok_or_else(|| {
            AppError::InvalidInput("serial code carries no duration prefix".to_string())
        })?;

        let _guard = self.user_locks.lock(params.user_id).await;

        let user = Users::find_by_id(params.user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        if user.is_banned {
            return Err(AppError::Forbidden("User is banned".to_string()));
        }

        let txn = self.db.begin().await?;

        let existing = Rentals::find()
            .filter(rentals::Column::UserId.eq(params.user_id))
            .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(
                "User already has an active rental".to_string(),
            ));
        }

        let serial = SerialService::activate(&txn, &params.serial_code, params.user_id).await?;

        let server = Servers::find_by_id(params.server_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Server not found".to_string()))?;

        let container = DockerContainers::find_by_id(params.container_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Container not found".to_string()))?;
        if container.user_id.is_some() {
            return Err(AppError::Conflict(
                "Container is already assigned".to_string(),
            ));
        }
        if container.server_id != server.id {
            return Err(AppError::InvalidInput(
                "Container does not belong to the given server".to_string(),
            ));
        }

        let now = Utc::now();
        let end_date = now + Duration::days(days);
        let traffic_limit = params.traffic_limit.unwrap_or(container.traffic_limit);

        let rental = rentals::ActiveModel {
            user_id: Set(params.user_id),
            status: Set(rentals::STATUS_ACTIVE.to_string()),
            start_date: Set(now),
            end_date: Set(end_date),
            server_ids: Set(json!([server.id])),
            container_ids: Set(json!([container.id])),
            traffic_limit: Set(traffic_limit),
            traffic_usage: Set(0),
            serial_number_id: Set(serial.id),
            renewal_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let rental = rental.insert(&txn).await?;

        let mut container_active: docker_containers::ActiveModel = container.clone().into();
        container_active.user_id = Set(Some(params.user_id));
        container_active.status = Set(docker_containers::STATUS_RUNNING.to_string());
        container_active.update(&txn).await?;

        Servers::update_many()
            .col_expr(
                servers::Column::UserCount,
                Expr::col(servers::Column::UserCount).add(1),
            )
            .filter(servers::Column::Id.eq(server.id))
            .exec(&txn)
            .await?;

        let binding = user_containers::ActiveModel {
            user_id: Set(params.user_id),
            container_id: Set(container.id),
            server_id: Set(server.id),
            expiry_date: Set(end_date),
            created_at: Set(now),
            ..Default::default()
        };
        binding.insert(&txn).await?;

        let mut user_active: users::ActiveModel = user.clone().into();
        user_active.rental_expiry = Set(Some(end_date));
        user_active.update(&txn).await?;

        // Insert-if-absent; the composite key also rejects a racing duplicate.
        let association = UserServers::find_by_id((params.user_id, server.id))
            .one(&txn)
            .await?;
        if association.is_none() {
            let assoc = user_servers::ActiveModel {
                user_id: Set(params.user_id),
                server_id: Set(server.id),
                created_at: Set(now),
            };
            assoc.insert(&txn).await?;
        }

        append_history(&txn, params.user_id, rental.id, "created", now, end_date, 0).await?;

        txn.commit().await?;

        info!(
            "📦 Rental {} created for user {} ({} days, server {}, container {})",
            rental.id, params.user_id, days, server.id, container.id
        );

        // Post-commit, best effort.
        if let Err(e) = self.control.start(&server.ip, &container.name).await {
            warn!("Container start for rental {} failed: {}", rental.id, e);
            self.alerts
                .raise(
                    AlertType::General,
                    Some(params.user_id),
                    Some(server.id),
                    &format!("container {} failed to start: {}", container.name, e),
                )
                .await;
        }
        self.alerts
            .raise(
                AlertType::RentalCreated,
                Some(params.user_id),
                Some(server.id),
                &format!("rental {} active until {}", rental.id, end_date),
            )
            .await;
        self.alerts
            .enqueue_mail(
                &user.email,
                "Your rental is active",
                &format!(
                    "Dear {},\n\nYour rental is active until {}.\n\nThank you.",
                    user.username,
                    end_date.format("%Y-%m-%d")
                ),
            )
            .await;

        Ok(rental)
    }

    /// ACTIVE -> ACTIVE with a later end date. The rental is identified by
    /// the user's active row; the serial only supplies the added duration.
    /// Bindings never change on renewal.
    pub async fn renew_rental(
        &self,
        user_id: i32,
        serial_code: &str,
    ) -> Result<rentals::Model, AppError> {
        let days = serial_code::parse_duration_days(serial_code).ok_or_else(|| {
            AppError::InvalidInput("serial code carries no duration prefix".to_string())
        })?;

        let _guard = self.user_locks.lock(user_id).await;

        let user = Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let txn = self.db.begin().await?;

        let rental = Rentals::find()
            .filter(rentals::Column::UserId.eq(user_id))
            .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("No active rental for user".to_string()))?;

        let serial = SerialService::activate(&txn, serial_code, user_id).await?;

        let now = Utc::now();
        let old_end = rental.end_date;
        let new_end = old_end + Duration::days(days);

        let rental_id = rental.id;
        let start_date = rental.start_date;
        let renewal_count = rental.renewal_count;
        let mut rental_active: rentals::ActiveModel = rental.into();
        rental_active.end_date = Set(new_end);
        rental_active.renewal_count = Set(renewal_count + 1);
        rental_active.updated_at = Set(now);
        let rental = rental_active.update(&txn).await?;

        let record = renewal_records::ActiveModel {
            rental_id: Set(rental_id),
            serial_number_id: Set(serial.id),
            days_added: Set(days),
            old_end_date: Set(old_end),
            new_end_date: Set(new_end),
            created_at: Set(now),
            ..Default::default()
        };
        record.insert(&txn).await?;

        UserContainers::update_many()
            .col_expr(user_containers::Column::ExpiryDate, Expr::value(new_end))
            .filter(user_containers::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        let mut user_active: users::ActiveModel = user.clone().into();
        user_active.rental_expiry = Set(Some(new_end));
        user_active.update(&txn).await?;

        append_history(&txn, user_id, rental_id, "renewed", start_date, new_end, 0).await?;

        txn.commit().await?;

        info!(
            "📦 Rental {} renewed for user {} (+{} days, ends {})",
            rental_id, user_id, days, new_end
        );

        self.alerts
            .raise(
                AlertType::RentalRenewed,
                Some(user_id),
                None,
                &format!("rental {} extended to {}", rental_id, new_end),
            )
            .await;
        self.alerts
            .enqueue_mail(
                &user.email,
                "Your rental has been renewed",
                &format!(
                    "Dear {},\n\nYour rental now runs until {}.\n\nThank you.",
                    user.username,
                    new_end.format("%Y-%m-%d")
                ),
            )
            .await;

        Ok(rental)
    }

    /// ACTIVE -> EXPIRED for every rental past its end date. One transaction
    /// per rental; the status flip is guarded on `status = 'active'`, so a
    /// second sweep (or a concurrent one) finds nothing to do. Container
    /// bindings and traffic rollups are reclaimed; history is appended, not
    /// deleted.
    pub async fn sweep_expired(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let due = Rentals::find()
            .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
            .filter(rentals::Column::EndDate.lt(now))
            .limit(SWEEP_BATCH)
            .all(&self.db)
            .await?;

        let mut swept = 0u64;
        for rental in due {
            match self.expire_one(&rental).await {
                Ok(true) => swept += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to expire rental {}: {}", rental.id, e);
                }
            }
        }

        if swept > 0 {
            info!("🧹 Expired {} rentals", swept);
        }
        Ok(swept)
    }

    async fn expire_one(&self, rental: &rentals::Model) -> Result<bool, AppError> {
        // Serialize against create/renew for the same user. The due list was
        // read without this lock, so the row may have moved on since.
        let _guard = self.user_locks.lock(rental.user_id).await;

        let txn = self.db.begin().await?;

        let flipped = Rentals::update_many()
            .col_expr(
                rentals::Column::Status,
                Expr::value(rentals::STATUS_EXPIRED),
            )
            .col_expr(rentals::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(rentals::Column::Id.eq(rental.id))
            .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
            .filter(rentals::Column::EndDate.lt(Utc::now()))
            .exec(&txn)
            .await?;
        if flipped.rows_affected == 0 {
            // Someone else got here first, or a renewal pushed the end date
            // back out after the due list was read.
            return Ok(false);
        }

        let containers = DockerContainers::find()
            .filter(docker_containers::Column::UserId.eq(rental.user_id))
            .all(&txn)
            .await?;
        let total_traffic: i64 = containers
            .iter()
            .map(|c| c.upload_traffic + c.download_traffic)
            .sum();
        let released: Vec<(i32, String)> = containers
            .iter()
            .map(|c| (c.server_id, c.name.clone()))
            .collect();

        DockerContainers::update_many()
            .col_expr(docker_containers::Column::UserId, Expr::value(Option::<i32>::None))
            .col_expr(
                docker_containers::Column::Status,
                Expr::value(docker_containers::STATUS_STOPPED),
            )
            .filter(docker_containers::Column::UserId.eq(rental.user_id))
            .exec(&txn)
            .await?;

        for server_id in rental_server_ids(rental) {
            Servers::update_many()
                .col_expr(
                    servers::Column::UserCount,
                    Expr::col(servers::Column::UserCount).sub(1),
                )
                .filter(servers::Column::Id.eq(server_id))
                .filter(servers::Column::UserCount.gt(0))
                .exec(&txn)
                .await?;
        }

        UserContainers::delete_many()
            .filter(user_containers::Column::UserId.eq(rental.user_id))
            .exec(&txn)
            .await?;
        UserTraffic::delete_many()
            .filter(user_traffic::Column::UserId.eq(rental.user_id))
            .exec(&txn)
            .await?;

        Users::update_many()
            .col_expr(
                users::Column::RentalExpiry,
                Expr::value(Option::<chrono::DateTime<Utc>>::None),
            )
            .filter(users::Column::Id.eq(rental.user_id))
            .exec(&txn)
            .await?;

        append_history(
            &txn,
            rental.user_id,
            rental.id,
            "expired",
            rental.start_date,
            rental.end_date,
            total_traffic,
        )
        .await?;

        txn.commit().await?;

        // Post-commit, best effort.
        for (server_id, name) in released {
            if let Ok(Some(server)) = Servers::find_by_id(server_id).one(&self.db).await {
                if let Err(e) = self.control.stop(&server.ip, &name).await {
                    warn!("Container stop after expiry failed for {}: {}", name, e);
                }
            }
        }
        self.alerts
            .raise(
                AlertType::RentalExpired,
                Some(rental.user_id),
                None,
                &format!("rental {} expired, resources released", rental.id),
            )
            .await;
        if let Ok(Some(user)) = Users::find_by_id(rental.user_id).one(&self.db).await {
            self.alerts
                .enqueue_mail(
                    &user.email,
                    "Your rental has expired",
                    &format!(
                        "Dear {},\n\nYour rental expired on {}. Activate a new serial number to restore service.\n\nThank you.",
                        user.username,
                        rental.end_date.format("%Y-%m-%d")
                    ),
                )
                .await;
        }

        Ok(true)
    }

    /// Queues a reminder mail for every active rental ending within
    /// `reminder_days`, once per rental.
    pub async fn send_renewal_reminders(&self, reminder_days: i64) -> Result<u64, AppError> {
        let now = Utc::now();
        let horizon = now + Duration::days(reminder_days);

        let ending_soon = Rentals::find()
            .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
            .filter(rentals::Column::EndDate.gt(now))
            .filter(rentals::Column::EndDate.lt(horizon))
            .all(&self.db)
            .await?;

        let mut sent = 0u64;
        for rental in ending_soon {
            let window_start = rental.end_date - Duration::days(reminder_days);
            if self
                .alerts
                .reminder_already_sent(&self.db, rental.user_id, window_start)
                .await?
            {
                continue;
            }

            let Some(user) = Users::find_by_id(rental.user_id).one(&self.db).await? else {
                continue;
            };

            self.alerts
                .raise(
                    AlertType::RenewalReminder,
                    Some(rental.user_id),
                    None,
                    &format!("rental {} ends {}", rental.id, rental.end_date),
                )
                .await;
            self.alerts
                .enqueue_mail(
                    &user.email,
                    "Your rental is about to expire",
                    &format!(
                        "Dear {},\n\nYour rental ends on {}. Renew to avoid interruption of service.\n\nThank you.",
                        user.username,
                        rental.end_date.format("%Y-%m-%d")
                    ),
                )
                .await;
            sent += 1;
        }

        Ok(sent)
    }
}

fn rental_server_ids(rental: &rentals::Model) -> Vec<i32> {
    serde_json::from_value(rental.server_ids.clone()).unwrap_or_default()
}

async fn append_history<C: ConnectionTrait>(
    conn: &C,
    user_id: i32,
    rental_id: i32,
    event: &str,
    rental_start: chrono::DateTime<Utc>,
    rental_end: chrono::DateTime<Utc>,
    total_traffic: i64,
) -> Result<(), AppError> {
    let row = user_history::ActiveModel {
        user_id: Set(user_id),
        rental_id: Set(Some(rental_id)),
        event: Set(event.to_string()),
        rental_start: Set(rental_start),
        rental_end: Set(rental_end),
        total_traffic: Set(total_traffic),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    row.insert(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::run_migrations;
    use crate::services::container_control::NoopControl;
    use sea_orm::{ActiveModelTrait, Database};

    async fn setup() -> (DatabaseConnection, RentalService) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();
        let service = RentalService::new(
            db.clone(),
            KeyedMutex::new(),
            AlertService::new(db.clone()),
            Arc::new(NoopControl),
        );
        (db, service)
    }

    async fn insert_fixtures(db: &DatabaseConnection) -> (i32, i32, i32) {
        let now = Utc::now();
        let user = users::ActiveModel {
            username: Set("renter".to_string()),
            email: Set("renter@example.com".to_string()),
            password_hash: Set("x".to_string()),
            role: Set("user".to_string()),
            rental_expiry: Set(None),
            is_banned: Set(false),
            is_verified: Set(true),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();

        let server = servers::ActiveModel {
            ip: Set("192.0.2.1".to_string()),
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
        .unwrap();

        let container = docker_containers::ActiveModel {
            server_id: Set(server.id),
            user_id: Set(None),
            name: Set("box-1".to_string()),
            status: Set(docker_containers::STATUS_STOPPED.to_string()),
            port: Set(10000),
            stun_port: Set(20000),
            upload_traffic: Set(0),
            download_traffic: Set(0),
            traffic_limit: Set(1000),
            remaining_traffic: Set(1000),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();

        (user.id, server.id, container.id)
    }

    #[tokio::test]
    async fn renewal_after_due_list_read_is_not_expired() {
        let (db, service) = setup().await;
        let (user_id, server_id, container_id) = insert_fixtures(&db).await;

        let codes = SerialService::generate(&db, 2, 30, "30").await.unwrap();
        let rental = service
            .create_rental(CreateRentalParams {
                serial_code: codes[0].clone(),
                user_id,
                server_id,
                container_id,
                traffic_limit: None,
            })
            .await
            .unwrap();

        // The rental falls due and the sweep reads it into its batch.
        let mut aged: rentals::ActiveModel = rental.into();
        aged.end_date = Set(Utc::now() - Duration::days(1));
        let stale = aged.update(&db).await.unwrap();

        // A renewal lands before the sweep reaches the row.
        service.renew_rental(user_id, &codes[1]).await.unwrap();

        // The guarded flip must see the extended end date and stand down.
        assert!(!service.expire_one(&stale).await.unwrap());

        let current = Rentals::find_by_id(stale.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, rentals::STATUS_ACTIVE);
        assert!(current.end_date > Utc::now());

        // The just-renewed bindings stayed in place.
        let container = DockerContainers::find_by_id(container_id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(container.user_id, Some(user_id));
        let user = Users::find_by_id(user_id).one(&db).await.unwrap().unwrap();
        assert_eq!(user.rental_expiry, Some(current.end_date));
    }

    #[tokio::test]
    async fn past_due_rental_still_expires() {
        let (db, service) = setup().await;
        let (user_id, server_id, container_id) = insert_fixtures(&db).await;

        let codes = SerialService::generate(&db, 1, 30, "30").await.unwrap();
        let rental = service
            .create_rental(CreateRentalParams {
                serial_code: codes[0].clone(),
                user_id,
                server_id,
                container_id,
                traffic_limit: None,
            })
            .await
            .unwrap();

        let mut aged: rentals::ActiveModel = rental.into();
        aged.end_date = Set(Utc::now() - Duration::days(1));
        let stale = aged.update(&db).await.unwrap();

        assert!(service.expire_one(&stale).await.unwrap());
        let current = Rentals::find_by_id(stale.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, rentals::STATUS_EXPIRED);
    }
}
