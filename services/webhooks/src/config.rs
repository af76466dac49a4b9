/// Webhooks service configuration loaded from environment variables.
#[derive(Debug)]
pub struct WebhooksConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL for the broker binding.
    pub redis_url: String,
    /// TCP port for the HTTP server (default 3120). Env var: `WEBHOOKS_PORT`.
    pub webhooks_port: u16,
    /// Prefix of broker consumer names (default "webhooks"). Env var: `APP_NAME`.
    pub app_name: String,
    /// Seconds between retry scans (default 120). Env var: `RETRY_INTERVAL_SECS`.
    pub retry_interval_secs: u64,
    /// Outbound delivery timeout in seconds (default 10). Env var: `DELIVERY_TIMEOUT_SECS`.
    pub delivery_timeout_secs: u64,
    /// Attempt ceiling per event; 0 disables it (default 20). Env var: `MAX_DELIVERY_ATTEMPTS`.
    pub max_delivery_attempts: u32,
    /// Approximate per-topic stream length (default 100000). Env var: `PUBSUB_STREAM_MAX_LEN`.
    pub pubsub_stream_max_len: usize,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl WebhooksConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            redis_url: std::env::var("REDIS_URL").expect("REDIS_URL"),
            webhooks_port: env_or("WEBHOOKS_PORT", 3120),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "webhooks".to_owned()),
            retry_interval_secs: env_or("RETRY_INTERVAL_SECS", 120),
            delivery_timeout_secs: env_or("DELIVERY_TIMEOUT_SECS", 10),
            max_delivery_attempts: env_or("MAX_DELIVERY_ATTEMPTS", 20),
            pubsub_stream_max_len: env_or("PUBSUB_STREAM_MAX_LEN", 100_000),
        }
    }
}
