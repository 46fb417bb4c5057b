//! Process-wide settings (C12), read once from the environment at startup.
//! Plain `std::env::var` with `.unwrap_or` defaults, matching this
//! codebase's preference for hand-rolled config over an env-parsing crate.

#[derive(Debug, Clone)]
pub struct Settings {
    pub coordination_url: String,
    pub default_upstream_timeout_ms: u64,
    pub max_cache_body_size: u64,
    pub default_rate_limit_rps: f64,
    pub default_rate_limit_burst: u32,
    pub abuse_ewma_alpha: f64,
    pub abuse_zscore_threshold: f64,
    pub abuse_block_duration_seconds: u64,
    pub bloom_expected_items: u64,
    pub bloom_false_positive_rate: f64,
    pub bind_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Self {
        let log_format = match env_string_or("LOG_FORMAT", "compact").as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Self {
            coordination_url: env_string_or("COORDINATION_URL", ""),
            default_upstream_timeout_ms: env_or("DEFAULT_UPSTREAM_TIMEOUT_MS", 30_000),
            max_cache_body_size: env_or("MAX_CACHE_BODY_SIZE", 10_485_760),
            default_rate_limit_rps: env_or("DEFAULT_RATE_LIMIT_RPS", 100.0),
            default_rate_limit_burst: env_or("DEFAULT_RATE_LIMIT_BURST", 200),
            abuse_ewma_alpha: env_or("ABUSE_EWMA_ALPHA", 0.3),
            abuse_zscore_threshold: env_or("ABUSE_ZSCORE_THRESHOLD", 3.0),
            abuse_block_duration_seconds: env_or("ABUSE_BLOCK_DURATION_SECONDS", 300),
            bloom_expected_items: env_or("BLOOM_EXPECTED_ITEMS", 10_000),
            bloom_false_positive_rate: env_or("BLOOM_FALSE_POSITIVE_RATE", 0.01),
            bind_addr: env_string_or("GATEWAY_BIND_ADDR", "0.0.0.0:8080"),
            log_level: env_string_or("LOG_LEVEL", "info"),
            log_format,
        }
    }

    pub fn init_tracing(&self) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.log_level));

        match self.log_format {
            LogFormat::Json => {
                tracing_subscriber::fmt().with_env_filter(filter).json().init();
            }
            LogFormat::Compact => {
                tracing_subscriber::fmt().with_env_filter(filter).compact().init();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn unset_vars_fall_back_to_the_documented_defaults() {
        std::env::remove_var("DEFAULT_RATE_LIMIT_RPS");
        std::env::remove_var("BLOOM_FALSE_POSITIVE_RATE");
        let settings = Settings::from_env();
        assert_eq!(settings.default_rate_limit_rps, 100.0);
        assert_eq!(settings.bloom_false_positive_rate, 0.01);
        assert_eq!(settings.bind_addr, "0.0.0.0:8080");
    }
}
