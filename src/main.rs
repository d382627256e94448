use clap::Parser;
use dotenvy::dotenv;
use rust_rental_backend::config::AppConfig;
use rust_rental_backend::infrastructure::database;
use rust_rental_backend::services::acl::AclService;
use rust_rental_backend::services::alerts::AlertService;
use rust_rental_backend::services::container_control::SshContainerControl;
use rust_rental_backend::services::mailer::SmtpMailer;
use rust_rental_backend::services::metrics_source::HttpMetricsSource;
use rust_rental_backend::services::rate_limit::CheckRateLimiter;
use rust_rental_backend::services::rental::RentalService;
use rust_rental_backend::services::traffic::TrafficService;
use rust_rental_backend::services::worker::BackgroundWorker;
use rust_rental_backend::utils::keyed_mutex::KeyedMutex;
use rust_rental_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, worker, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_rental_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Rust Rental Backend [Mode: {}]...", args.mode);

    let db = database::setup_database().await?;
    let config = AppConfig::from_env();
    info!(
        "⚙️  Config: acl_dir={}, sweep_interval={}s, reminder_days={}",
        config.acl_dir, config.sweep_interval_secs, config.reminder_days
    );

    let mailer: Arc<dyn rust_rental_backend::services::mailer::Mailer> =
        Arc::new(SmtpMailer::new(&config));
    let control: Arc<dyn rust_rental_backend::services::container_control::ContainerControl> =
        Arc::new(SshContainerControl::new(config.ssh_timeout_secs));
    let metrics: Arc<dyn rust_rental_backend::services::metrics_source::MetricsSource> = Arc::new(
        HttpMetricsSource::new(&config.metrics_url, config.scrape_timeout_secs),
    );

    let alerts = AlertService::new(db.clone());
    let rentals = Arc::new(RentalService::new(
        db.clone(),
        KeyedMutex::new(),
        alerts.clone(),
        control.clone(),
    ));
    let traffic = TrafficService::new(db.clone());
    let acl = AclService::new(db.clone(), &config.acl_dir, Arc::new(dashmap::DashMap::new()));
    let check_limiter = CheckRateLimiter::new(
        config.check_rate_per_minute,
        config.check_failures_per_window,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    if args.mode == "worker" || args.mode == "all" {
        let worker = BackgroundWorker::new(
            rentals.clone(),
            traffic.clone(),
            alerts.clone(),
            mailer.clone(),
            metrics.clone(),
            check_limiter.clone(),
            config.clone(),
            shutdown_rx.clone(),
        );
        handles.push(tokio::spawn(worker.run()));
        info!("👷 Worker service initialized.");
    }

    if args.mode == "api" || args.mode == "all" {
        let state = AppState {
            db: db.clone(),
            config: config.clone(),
            rentals: rentals.clone(),
            traffic: traffic.clone(),
            acl: acl.clone(),
            alerts: alerts.clone(),
            check_limiter: check_limiter.clone(),
        };

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            );

        let app = create_app(state).layer(trace_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
        info!(
            "📖 Swagger UI documentation: http://localhost:{}/swagger-ui",
            args.port
        );

        handles.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        }));
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down backend services...");
    for handle in handles {
        let _ = handle.await;
    }

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
