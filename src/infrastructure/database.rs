use crate::entities::{
    acl_logs, docker_containers, mail_outbox, renewal_records, rentals, serial_numbers,
    server_traffic, servers, system_alerts, user_containers, user_history, user_servers,
    user_traffic, users,
};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    crate::infrastructure::seed::seed_initial_data(&db).await?;

    Ok(db)
}

pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    info!("🔄 Running SeaORM auto-migrations...");

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmts = vec![
        schema
            .create_table_from_entity(users::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(serial_numbers::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(servers::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(docker_containers::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(rentals::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(user_containers::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(user_servers::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(renewal_records::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(user_history::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(user_traffic::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(server_traffic::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(acl_logs::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(system_alerts::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(mail_outbox::Entity)
            .if_not_exists()
            .to_owned(),
    ];

    for stmt in stmts {
        let stmt = builder.build(&stmt);
        let _ = db.execute(stmt).await;
    }

    // Sweep and over-limit queries filter on these constantly.
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_rentals_status_end_date ON rentals(status, end_date);",
        "CREATE INDEX IF NOT EXISTS idx_serial_numbers_status ON serial_numbers(status);",
        "CREATE INDEX IF NOT EXISTS idx_containers_remaining ON docker_containers(remaining_traffic);",
        "CREATE INDEX IF NOT EXISTS idx_outbox_status ON mail_outbox(status);",
    ];
    for idx in indexes {
        let _ = db
            .execute(sea_orm::Statement::from_string(builder, idx.to_string()))
            .await;
    }

    Ok(())
}
