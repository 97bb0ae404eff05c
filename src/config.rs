use std::env;
use std::time::Duration;

/// Runtime configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub close_check_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:trusty_tally.db".to_string()),
            rate_limit_max: env_parse("RATE_LIMIT_MAX", 10),
            rate_limit_window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 60)),
            close_check_interval: Duration::from_secs(env_parse("CLOSE_CHECK_INTERVAL_SECS", 60)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
