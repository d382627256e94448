use crate::api::error::AppError;
use crate::entities::{docker_containers, prelude::*, rentals, server_traffic, user_traffic};
use crate::services::metrics_source::MetricsSource;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use tracing::info;

/// Most recent container rows considered per rollup. An explicit cap, not a
/// pagination artifact.
const ROLLUP_ROW_CAP: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrafficSummary {
    pub total_traffic: i64,
    pub remaining_traffic: i64,
    pub traffic_limit: i64,
}

/// total = Σ(upload+download), remaining = Σ remaining, limit = max of the
/// per-row limits. The max-not-sum limit policy is inherited behavior: the
/// binding limit is the largest individual container limit seen.
pub fn aggregate(rows: &[docker_containers::Model]) -> TrafficSummary {
    TrafficSummary {
        total_traffic: rows.iter().map(|c| c.upload_traffic + c.download_traffic).sum(),
        remaining_traffic: rows.iter().map(|c| c.remaining_traffic).sum(),
        traffic_limit: rows.iter().map(|c| c.traffic_limit).max().unwrap_or(0),
    }
}

/// Aggregates per-container counters into per-user and per-server rollup
/// rows. Rollups are overwritten each cycle rather than accumulated.
#[derive(Clone)]
pub struct TrafficService {
    db: DatabaseConnection,
}

impl TrafficService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Refreshes every assigned container's counters from the metrics
    /// source. A failed scrape skips the container. Returns how many
    /// containers were updated.
    pub async fn ingest(&self, source: &dyn MetricsSource) -> Result<usize, AppError> {
        let containers = DockerContainers::find()
            .filter(docker_containers::Column::UserId.is_not_null())
            .all(&self.db)
            .await?;

        let mut updated = 0;
        for container in containers {
            let Some(sample) = source.scrape(&container.name).await else {
                continue;
            };

            let limit = container.traffic_limit;
            let mut active: docker_containers::ActiveModel = container.into();
            active.upload_traffic = Set(sample.upload);
            active.download_traffic = Set(sample.download);
            active.remaining_traffic = Set(limit - (sample.upload + sample.download));
            active.update(&self.db).await?;
            updated += 1;
        }

        if updated > 0 {
            info!("📊 Ingested traffic samples for {} containers", updated);
        }
        Ok(updated)
    }

    /// Recomputes the user's rollup row and back-propagates the total into
    /// the active rental's `traffic_usage`.
    pub async fn refresh_user_rollup(&self, user_id: i32) -> Result<TrafficSummary, AppError> {
        let rows = DockerContainers::find()
            .filter(docker_containers::Column::UserId.eq(user_id))
            .order_by_desc(docker_containers::Column::CreatedAt)
            .limit(ROLLUP_ROW_CAP)
            .all(&self.db)
            .await?;

        let summary = aggregate(&rows);
        let now = Utc::now();

        match UserTraffic::find()
            .filter(user_traffic::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
        {
            Some(existing) => {
                let mut active: user_traffic::ActiveModel = existing.into();
                active.total_traffic = Set(summary.total_traffic);
                active.remaining_traffic = Set(summary.remaining_traffic);
                active.traffic_limit = Set(summary.traffic_limit);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let row = user_traffic::ActiveModel {
                    user_id: Set(user_id),
                    total_traffic: Set(summary.total_traffic),
                    remaining_traffic: Set(summary.remaining_traffic),
                    traffic_limit: Set(summary.traffic_limit),
                    updated_at: Set(now),
                    ..Default::default()
                };
                row.insert(&self.db).await?;
            }
        }

        if let Some(rental) = Rentals::find()
            .filter(rentals::Column::UserId.eq(user_id))
            .filter(rentals::Column::Status.eq(rentals::STATUS_ACTIVE))
            .one(&self.db)
            .await?
        {
            let mut active: rentals::ActiveModel = rental.into();
            active.traffic_usage = Set(summary.total_traffic);
            active.updated_at = Set(now);
            active.update(&self.db).await?;
        }

        Ok(summary)
    }

    /// Recomputes a server's rollup row from its containers.
    pub async fn refresh_server_rollup(&self, server_id: i32) -> Result<TrafficSummary, AppError> {
        let rows = DockerContainers::find()
            .filter(docker_containers::Column::ServerId.eq(server_id))
            .order_by_desc(docker_containers::Column::CreatedAt)
            .limit(ROLLUP_ROW_CAP)
            .all(&self.db)
            .await?;

        let summary = aggregate(&rows);
        let now = Utc::now();

        match ServerTraffic::find()
            .filter(server_traffic::Column::ServerId.eq(server_id))
            .one(&self.db)
            .await?
        {
            Some(existing) => {
                let mut active: server_traffic::ActiveModel = existing.into();
                active.total_traffic = Set(summary.total_traffic);
                active.remaining_traffic = Set(summary.remaining_traffic);
                active.traffic_limit = Set(summary.traffic_limit);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let row = server_traffic::ActiveModel {
                    server_id: Set(server_id),
                    total_traffic: Set(summary.total_traffic),
                    remaining_traffic: Set(summary.remaining_traffic),
                    traffic_limit: Set(summary.traffic_limit),
                    updated_at: Set(now),
                    ..Default::default()
                };
                row.insert(&self.db).await?;
            }
        }

        Ok(summary)
    }

    /// Distinct (user, server) pairs with an assigned container, driving the
    /// periodic rollup refresh.
    pub async fn active_bindings(&self) -> Result<Vec<(i32, i32)>, AppError> {
        let rows = DockerContainers::find()
            .filter(docker_containers::Column::UserId.is_not_null())
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|c| c.user_id.map(|u| (u, c.server_id)))
            .collect())
    }

    /// Containers that have run past their limit, independent of the rollups.
    pub async fn over_limit_containers(
        &self,
    ) -> Result<Vec<docker_containers::Model>, AppError> {
        let rows = DockerContainers::find()
            .filter(docker_containers::Column::RemainingTraffic.lt(0))
            .filter(docker_containers::Column::UserId.is_not_null())
            .all(&self.db)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(upload: i64, download: i64, limit: i64) -> docker_containers::Model {
        docker_containers::Model {
            id: 0,
            server_id: 1,
            user_id: Some(1),
            name: "c".to_string(),
            status: "running".to_string(),
            port: 443,
            stun_port: 3478,
            upload_traffic: upload,
            download_traffic: download,
            traffic_limit: limit,
            remaining_traffic: limit - (upload + download),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_aggregate_sums_traffic_and_takes_max_limit() {
        let rows = vec![
            container(10, 1, 100),
            container(20, 2, 50),
            container(5, 1, 200),
        ];
        let summary = aggregate(&rows);
        assert_eq!(summary.total_traffic, 39);
        assert_eq!(summary.traffic_limit, 200);
        assert_eq!(summary.remaining_traffic, (100 - 11) + (50 - 22) + (200 - 6));
    }

    #[test]
    fn test_aggregate_empty() {
        let summary = aggregate(&[]);
        assert_eq!(summary.total_traffic, 0);
        assert_eq!(summary.remaining_traffic, 0);
        assert_eq!(summary.traffic_limit, 0);
    }
}
