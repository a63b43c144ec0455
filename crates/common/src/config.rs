use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the HTTP API listens on (default: 3000)
    pub api_port: u16,

    /// Push delivery endpoint. When unset, every send fails as "not configured".
    pub push_endpoint_url: Option<String>,

    /// Bearer key sent with every push delivery request
    pub push_api_key: Option<String>,

    /// Per-request timeout for the push endpoint in milliseconds (default: 10000)
    pub push_timeout_ms: u64,

    /// Queue drain tick in milliseconds (default: 100)
    pub queue_drain_interval_ms: u64,

    /// Maximum queued sends in flight at once (default: 3)
    pub queue_max_concurrent: usize,

    /// Retries allowed per notification after the first attempt (default: 3)
    pub notify_max_retries: u32,

    /// Delay before the first retry in milliseconds (default: 2000)
    pub retry_base_delay_ms: u64,

    /// Multiplier applied to the delay on each further retry (default: 4)
    pub retry_backoff_factor: u32,

    /// How far back the startup sweep looks for failed notifications (default: 24)
    pub retry_lookback_hours: i64,

    /// Notification history retention in days (default: 30)
    pub notify_retention_days: i64,

    /// How often expired history is purged, in seconds (default: 3600)
    pub cleanup_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            push_endpoint_url: std::env::var("PUSH_ENDPOINT_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            push_api_key: std::env::var("PUSH_API_KEY").ok(),
            push_timeout_ms: std::env::var("PUSH_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_TIMEOUT_MS must be a valid u64"))?,
            queue_drain_interval_ms: std::env::var("QUEUE_DRAIN_INTERVAL_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_DRAIN_INTERVAL_MS must be a valid u64"))?,
            queue_max_concurrent: std::env::var("QUEUE_MAX_CONCURRENT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_MAX_CONCURRENT must be a valid usize"))?,
            notify_max_retries: std::env::var("NOTIFY_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFY_MAX_RETRIES must be a valid u32"))?,
            retry_base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BASE_DELAY_MS must be a valid u64"))?,
            retry_backoff_factor: std::env::var("RETRY_BACKOFF_FACTOR")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BACKOFF_FACTOR must be a valid u32"))?,
            retry_lookback_hours: std::env::var("RETRY_LOOKBACK_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_LOOKBACK_HOURS must be a valid i64"))?,
            notify_retention_days: std::env::var("NOTIFY_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFY_RETENTION_DAYS must be a valid i64"))?,
            cleanup_interval_secs: std::env::var("CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CLEANUP_INTERVAL_SECS must be a valid u64"))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot become a sensible duration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_lookback_hours <= 0 || self.retry_lookback().is_none() {
            anyhow::bail!(
                "RETRY_LOOKBACK_HOURS must be a positive number of hours, got {}",
                self.retry_lookback_hours
            );
        }
        if self.notify_retention_days <= 0 || self.retention().is_none() {
            anyhow::bail!(
                "NOTIFY_RETENTION_DAYS must be a positive number of days, got {}",
                self.notify_retention_days
            );
        }
        Ok(())
    }

    /// Recovery sweep window, `None` when out of range.
    pub fn retry_lookback(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_hours(self.retry_lookback_hours)
    }

    /// History retention, `None` when out of range.
    pub fn retention(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_days(self.notify_retention_days)
    }
}
