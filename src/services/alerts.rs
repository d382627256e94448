use crate::api::error::AppError;
use crate::entities::{mail_outbox, prelude::*, system_alerts};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, Copy)]
pub enum AlertType {
    RentalCreated,
    RentalRenewed,
    RentalExpired,
    RenewalReminder,
    TrafficOverLimit,
    General,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::RentalCreated => "rental_created",
            AlertType::RentalRenewed => "rental_renewed",
            AlertType::RentalExpired => "rental_expired",
            AlertType::RenewalReminder => "renewal_reminder",
            AlertType::TrafficOverLimit => "traffic_over_limit",
            AlertType::General => "general",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts lifecycle and threshold events into persisted alert rows and
/// outbox mail. Everything here is best-effort from the caller's point of
/// view: failures are logged, never propagated into a lifecycle transaction.
#[derive(Clone)]
pub struct AlertService {
    db: DatabaseConnection,
}

impl AlertService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persists an alert row. Logs and swallows persistence errors.
    pub async fn raise(
        &self,
        alert_type: AlertType,
        user_id: Option<i32>,
        server_id: Option<i32>,
        message: &str,
    ) {
        info!(
            target: "alerts",
            alert_type = %alert_type,
            user_id = ?user_id,
            server_id = ?server_id,
            "{}", message
        );

        let alert = system_alerts::ActiveModel {
            user_id: Set(user_id),
            server_id: Set(server_id),
            alert_type: Set(alert_type.as_str().to_string()),
            message: Set(message.to_string()),
            status: Set(system_alerts::STATUS_ACTIVE.to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        if let Err(e) = alert.insert(&self.db).await {
            error!("Failed to persist alert: {}", e);
        }
    }

    /// Queues a mail for delivery by the background worker. Best-effort.
    pub async fn enqueue_mail(&self, recipient: &str, subject: &str, body: &str) {
        let row = mail_outbox::ActiveModel {
            recipient: Set(recipient.to_string()),
            subject: Set(subject.to_string()),
            body: Set(body.to_string()),
            status: Set(mail_outbox::STATUS_PENDING.to_string()),
            attempts: Set(0),
            last_error: Set(None),
            created_at: Set(Utc::now()),
            sent_at: Set(None),
            ..Default::default()
        };

        if let Err(e) = row.insert(&self.db).await {
            error!("Failed to enqueue mail for {}: {}", recipient, e);
        }
    }

    /// Delivers pending outbox rows through `mailer`, bounded at
    /// `max_attempts` per row. Returns the number delivered this pass.
    pub async fn flush_outbox(
        &self,
        mailer: &dyn crate::services::mailer::Mailer,
        max_attempts: i32,
    ) -> Result<usize, AppError> {
        let pending = MailOutbox::find()
            .filter(mail_outbox::Column::Status.eq(mail_outbox::STATUS_PENDING))
            .order_by_asc(mail_outbox::Column::CreatedAt)
            .limit(100)
            .all(&self.db)
            .await?;

        let mut delivered = 0;
        for row in pending {
            let attempts = row.attempts + 1;
            let mut active: mail_outbox::ActiveModel = row.clone().into();
            active.attempts = Set(attempts);

            match mailer.send(&row.recipient, &row.subject, &row.body).await {
                Ok(()) => {
                    active.status = Set(mail_outbox::STATUS_SENT.to_string());
                    active.sent_at = Set(Some(Utc::now()));
                    active.last_error = Set(None);
                    delivered += 1;
                }
                Err(e) => {
                    error!(
                        "Mail delivery to {} failed (attempt {}): {}",
                        row.recipient, attempts, e
                    );
                    active.last_error = Set(Some(e.to_string()));
                    if attempts >= max_attempts {
                        active.status = Set(mail_outbox::STATUS_FAILED.to_string());
                    }
                }
            }

            active.update(&self.db).await?;
        }

        Ok(delivered)
    }

    pub async fn active_alerts(&self) -> Result<Vec<system_alerts::Model>, AppError> {
        let alerts = SystemAlerts::find()
            .filter(system_alerts::Column::Status.eq(system_alerts::STATUS_ACTIVE))
            .order_by_desc(system_alerts::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(alerts)
    }

    pub async fn resolve(&self, alert_id: i32) -> Result<(), AppError> {
        let alert = SystemAlerts::find_by_id(alert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Alert not found".to_string()))?;

        let mut active: system_alerts::ActiveModel = alert.into();
        active.status = Set(system_alerts::STATUS_RESOLVED.to_string());
        active.update(&self.db).await?;
        Ok(())
    }

    /// True when a reminder alert was already raised for the user since
    /// `since` (the start of the rental's reminder window), so the worker
    /// sends each reminder once.
    pub async fn reminder_already_sent<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i32,
        since: chrono::DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let existing = SystemAlerts::find()
            .filter(system_alerts::Column::UserId.eq(user_id))
            .filter(system_alerts::Column::AlertType.eq(AlertType::RenewalReminder.as_str()))
            .filter(system_alerts::Column::CreatedAt.gte(since))
            .one(conn)
            .await?;
        Ok(existing.is_some())
    }
}
