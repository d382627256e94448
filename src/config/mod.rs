use std::env;

/// Runtime configuration, loaded once at process start. No hot-reload.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// JWT secret key (required in production)
    pub jwt_secret: String,

    /// Directory that receives the per-user ACL JSON documents
    pub acl_dir: String,

    /// SMTP relay settings for the mail sender
    pub mail_host: String,
    pub mail_username: String,
    pub mail_password: String,

    /// URL template for the per-container metrics endpoint;
    /// `{name}` is replaced by the container name
    pub metrics_url: String,

    /// Timeout for remote docker control commands in seconds (default: 30)
    pub ssh_timeout_secs: u64,

    /// Timeout for metrics scraping in seconds (default: 5)
    pub scrape_timeout_secs: u64,

    /// Background sweep interval in seconds (default: 300)
    pub sweep_interval_secs: u64,

    /// Serial-check rate limit: requests per minute per address (default: 5)
    pub check_rate_per_minute: u32,

    /// Serial-check lockout: failed lookups per 5 minutes per address (default: 5)
    pub check_failures_per_window: u32,

    /// Days before expiry at which renewal reminders go out (default: 7)
    pub reminder_days: i64,

    /// Mail delivery attempts before an outbox row is marked failed (default: 3)
    pub mail_max_attempts: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "secret".to_string(),
            acl_dir: "./acl".to_string(),
            mail_host: "127.0.0.1".to_string(),
            mail_username: String::new(),
            mail_password: String::new(),
            metrics_url: "http://127.0.0.1:9100/metrics/{name}".to_string(),
            ssh_timeout_secs: 30,
            scrape_timeout_secs: 5,
            sweep_interval_secs: 300,
            check_rate_per_minute: 5,
            check_failures_per_window: 5,
            reminder_days: 7,
            mail_max_attempts: 3,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            jwt_secret: env::var("JWT_SECRET").unwrap_or(default.jwt_secret),

            acl_dir: env::var("ACL_DIR").unwrap_or(default.acl_dir),

            mail_host: env::var("MAIL_HOST").unwrap_or(default.mail_host),
            mail_username: env::var("MAIL_USERNAME").unwrap_or(default.mail_username),
            mail_password: env::var("MAIL_PASSWORD").unwrap_or(default.mail_password),

            metrics_url: env::var("METRICS_URL").unwrap_or(default.metrics_url),

            ssh_timeout_secs: env::var("SSH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.ssh_timeout_secs),

            scrape_timeout_secs: env::var("SCRAPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.scrape_timeout_secs),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.sweep_interval_secs),

            check_rate_per_minute: env::var("CHECK_RATE_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.check_rate_per_minute),

            check_failures_per_window: env::var("CHECK_FAILURES_PER_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.check_failures_per_window),

            reminder_days: env::var("REMINDER_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.reminder_days),

            mail_max_attempts: env::var("MAIL_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.mail_max_attempts),
        }
    }

    /// Create config for production (JWT secret must be provided)
    pub fn production() -> Self {
        let mut config = Self::from_env();
        config.jwt_secret = env::var("JWT_SECRET").expect("CRITICAL: JWT_SECRET must be set");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.ssh_timeout_secs, 30);
        assert_eq!(config.scrape_timeout_secs, 5);
        assert_eq!(config.check_rate_per_minute, 5);
        assert_eq!(config.check_failures_per_window, 5);
        assert_eq!(config.mail_max_attempts, 3);
    }

    #[test]
    fn test_from_env_falls_back_to_defaults() {
        unsafe {
            env::remove_var("SWEEP_INTERVAL_SECS");
            env::remove_var("REMINDER_DAYS");
        }
        let config = AppConfig::from_env();
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.reminder_days, 7);
    }
}
