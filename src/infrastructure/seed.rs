use crate::entities::{prelude::*, users};
use crate::utils::auth::hash_password;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::env;
use tracing::{info, warn};

/// Bootstraps the admin account on first start. Credentials come from
/// ADMIN_USERNAME / ADMIN_EMAIL / ADMIN_PASSWORD; without a password the
/// seeding is skipped.
pub async fn seed_initial_data(db: &DatabaseConnection) -> anyhow::Result<()> {
    let Some(password) = env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty()) else {
        warn!("ADMIN_PASSWORD not set, skipping admin account seeding");
        return Ok(());
    };

    let username = env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let email = env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@localhost".to_string());

    let exists = Users::find()
        .filter(users::Column::Username.eq(&username))
        .one(db)
        .await?;

    if exists.is_some() {
        return Ok(());
    }

    info!("🌱 Seeding admin account '{}'", username);

    let admin = users::ActiveModel {
        username: Set(username),
        email: Set(email),
        password_hash: Set(hash_password(&password)?),
        role: Set("admin".to_string()),
        rental_expiry: Set(None),
        is_banned: Set(false),
        is_verified: Set(true),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    admin.insert(db).await?;

    Ok(())
}
