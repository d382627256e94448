use crate::config::AppConfig;
use crate::services::alerts::{AlertService, AlertType};
use crate::services::mailer::Mailer;
use crate::services::metrics_source::MetricsSource;
use crate::services::rate_limit::CheckRateLimiter;
use crate::services::rental::RentalService;
use crate::services::serial::SerialService;
use crate::services::traffic::TrafficService;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::{error, info};

/// Periodic sweeps: rental and serial expiry, renewal reminders, traffic
/// accounting, outbox delivery. Every pass is idempotent and re-entrant; the
/// HTTP sweep trigger calls the same service methods.
pub struct BackgroundWorker {
    rentals: Arc<RentalService>,
    traffic: TrafficService,
    alerts: AlertService,
    mailer: Arc<dyn Mailer>,
    metrics: Arc<dyn MetricsSource>,
    rate_limiter: CheckRateLimiter,
    config: AppConfig,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rentals: Arc<RentalService>,
        traffic: TrafficService,
        alerts: AlertService,
        mailer: Arc<dyn Mailer>,
        metrics: Arc<dyn MetricsSource>,
        rate_limiter: CheckRateLimiter,
        config: AppConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rentals,
            traffic,
            alerts,
            mailer,
            metrics,
            rate_limiter,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("🚀 Background worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(Duration::from_secs(self.config.sweep_interval_secs)) => {
                    self.perform_sweeps().await;
                }
            }
        }
    }

    async fn perform_sweeps(&self) {
        info!("🧹 Running background sweeps...");

        if let Err(e) = self.rentals.sweep_expired().await {
            error!("Rental expiry sweep failed: {}", e);
        }

        if let Err(e) = SerialService::sweep_expired(self.rentals.db()).await {
            error!("Serial expiry sweep failed: {}", e);
        }

        if let Err(e) = self
            .rentals
            .send_renewal_reminders(self.config.reminder_days)
            .await
        {
            error!("Renewal reminders failed: {}", e);
        }

        self.accounting_cycle().await;

        if let Err(e) = self
            .alerts
            .flush_outbox(self.mailer.as_ref(), self.config.mail_max_attempts)
            .await
        {
            error!("Outbox flush failed: {}", e);
        }

        self.rate_limiter.cleanup();
        self.rentals.cleanup_locks();

        info!("✅ Background sweeps completed");
    }

    async fn accounting_cycle(&self) {
        match self.traffic.ingest(self.metrics.as_ref()).await {
            Ok(_) => {}
            Err(e) => {
                error!("Traffic ingest failed: {}", e);
                return;
            }
        }

        let bindings = match self.traffic.active_bindings().await {
            Ok(b) => b,
            Err(e) => {
                error!("Binding query failed: {}", e);
                return;
            }
        };

        let users: HashSet<i32> = bindings.iter().map(|(u, _)| *u).collect();
        let servers: HashSet<i32> = bindings.iter().map(|(_, s)| *s).collect();

        for user_id in users {
            if let Err(e) = self.traffic.refresh_user_rollup(user_id).await {
                error!("User rollup for {} failed: {}", user_id, e);
            }
        }
        for server_id in servers {
            if let Err(e) = self.traffic.refresh_server_rollup(server_id).await {
                error!("Server rollup for {} failed: {}", server_id, e);
            }
        }

        let over_limit = match self.traffic.over_limit_containers().await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Over-limit query failed: {}", e);
                return;
            }
        };

        for container in &over_limit {
            self.alerts
                .raise(
                    AlertType::TrafficOverLimit,
                    container.user_id,
                    Some(container.server_id),
                    &format!(
                        "container {} is {} bytes over its traffic limit",
                        container.name, -container.remaining_traffic
                    ),
                )
                .await;
        }
    }
}
