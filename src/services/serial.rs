use crate::api::error::AppError;
use crate::entities::{prelude::*, serial_numbers};
use crate::utils::serial_code;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use tracing::info;

const MAX_BATCH: i32 = 1000;
const MAX_COLLISION_RETRIES: usize = 16;

pub struct SerialService;

impl SerialService {
    /// Creates `count` unused codes of `prefix + 6 random chars`, each unique
    /// against existing codes (retry on collision). The stored
    /// `duration_days` ages the code itself; the rental length lives in the
    /// prefix digits.
    pub async fn generate(
        db: &DatabaseConnection,
        count: i32,
        duration_days: i32,
        prefix: &str,
    ) -> Result<Vec<String>, AppError> {
        if count <= 0 || duration_days <= 0 {
            return Err(AppError::InvalidInput(
                "count and duration_days must be positive".to_string(),
            ));
        }
        if count > MAX_BATCH {
            return Err(AppError::InvalidInput(format!(
                "at most {} codes per batch",
                MAX_BATCH
            )));
        }

        let now = Utc::now();
        let mut codes = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let code = Self::unique_code(db, prefix, &codes).await?;

            let row = serial_numbers::ActiveModel {
                code: Set(code.clone()),
                duration_days: Set(duration_days),
                status: Set(serial_numbers::STATUS_UNUSED.to_string()),
                user_id: Set(None),
                created_at: Set(now),
                expires_at: Set(now + Duration::days(duration_days as i64)),
                used_at: Set(None),
                ..Default::default()
            };
            row.insert(db).await?;
            codes.push(code);
        }

        info!("🔑 Generated {} serial codes (prefix '{}')", count, prefix);
        Ok(codes)
    }

    async fn unique_code(
        db: &DatabaseConnection,
        prefix: &str,
        batch: &[String],
    ) -> Result<String, AppError> {
        for _ in 0..MAX_COLLISION_RETRIES {
            let candidate = serial_code::generate_code(prefix);
            if batch.contains(&candidate) {
                continue;
            }
            let exists = SerialNumbers::find()
                .filter(serial_numbers::Column::Code.eq(&candidate))
                .one(db)
                .await?;
            if exists.is_none() {
                return Ok(candidate);
            }
        }
        Err(AppError::Internal(
            "could not generate a unique serial code".to_string(),
        ))
    }

    /// Read-only lookup; never mutates the row, expiry is computed.
    pub async fn check(
        db: &DatabaseConnection,
        code: &str,
    ) -> Result<serial_numbers::Model, AppError> {
        SerialNumbers::find()
            .filter(serial_numbers::Column::Code.eq(code))
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Serial number not found".to_string()))
    }

    /// Consumes an unused code for `user_id` inside the caller's transaction.
    /// The write is a conditional update guarded on `status = 'unused'`, so a
    /// concurrent activation of the same code loses with `Conflict` instead
    /// of double-consuming.
    pub async fn activate<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        user_id: i32,
    ) -> Result<serial_numbers::Model, AppError> {
        let serial = SerialNumbers::find()
            .filter(serial_numbers::Column::Code.eq(code))
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Serial number not found".to_string()))?;

        if serial.status != serial_numbers::STATUS_UNUSED {
            return Err(AppError::Conflict(format!(
                "Serial number already {}",
                serial.status
            )));
        }
        // The sweep may not have flipped an aged code yet.
        if serial.expires_at < Utc::now() {
            return Err(AppError::Conflict("Serial number expired".to_string()));
        }

        let result = SerialNumbers::update_many()
            .col_expr(
                serial_numbers::Column::Status,
                sea_orm::sea_query::Expr::value(serial_numbers::STATUS_USED),
            )
            .col_expr(
                serial_numbers::Column::UserId,
                sea_orm::sea_query::Expr::value(user_id),
            )
            .col_expr(
                serial_numbers::Column::UsedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(serial_numbers::Column::Id.eq(serial.id))
            .filter(serial_numbers::Column::Status.eq(serial_numbers::STATUS_UNUSED))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::Conflict(
                "Serial number already used".to_string(),
            ));
        }

        SerialNumbers::find_by_id(serial.id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::Internal("serial vanished during activation".to_string()))
    }

    /// Marks unused codes whose shelf life has passed. Idempotent.
    pub async fn sweep_expired(db: &DatabaseConnection) -> Result<u64, AppError> {
        let result = SerialNumbers::update_many()
            .col_expr(
                serial_numbers::Column::Status,
                sea_orm::sea_query::Expr::value(serial_numbers::STATUS_EXPIRED),
            )
            .filter(serial_numbers::Column::Status.eq(serial_numbers::STATUS_UNUSED))
            .filter(serial_numbers::Column::ExpiresAt.lt(Utc::now()))
            .exec(db)
            .await?;

        if result.rows_affected > 0 {
            info!("🔑 Expired {} stale serial codes", result.rows_affected);
        }
        Ok(result.rows_affected)
    }
}
