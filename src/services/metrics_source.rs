use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TrafficSample {
    pub upload: i64,
    pub download: i64,
}

/// Per-container traffic counters from the external metrics endpoint.
/// `None` means the sample could not be obtained; the accounting cycle skips
/// that container rather than failing.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn scrape(&self, container_name: &str) -> Option<TrafficSample>;
}

/// Scrapes `{metrics_url}` with `{name}` substituted, bounded by a short
/// timeout so a dead exporter cannot stall the accounting cycle.
pub struct HttpMetricsSource {
    client: reqwest::Client,
    url_template: String,
}

impl HttpMetricsSource {
    pub fn new(url_template: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("reqwest client");
        Self {
            client,
            url_template: url_template.to_string(),
        }
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn scrape(&self, container_name: &str) -> Option<TrafficSample> {
        let url = self.url_template.replace("{name}", container_name);

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!("Metrics scrape for {} timed out", container_name);
                return None;
            }
            Err(e) => {
                warn!("Metrics scrape for {} failed: {}", container_name, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "Metrics endpoint returned {} for {}",
                response.status(),
                container_name
            );
            return None;
        }

        match response.json::<TrafficSample>().await {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("Malformed metrics payload for {}: {}", container_name, e);
                None
            }
        }
    }
}

/// Fixed-sample source for tests.
pub struct StaticMetricsSource(pub TrafficSample);

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn scrape(&self, _container_name: &str) -> Option<TrafficSample> {
        Some(self.0)
    }
}
