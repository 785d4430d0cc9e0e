//! Configuration for the scheduler.

use std::time::Duration;

use anyhow::{Context, Result};
use berth_db::Role;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Fallback tick interval in seconds.
    pub tick_interval_secs: u64,

    /// Secret cache TTL in seconds.
    pub secret_cache_ttl_secs: u64,

    /// Maximum concurrent boots, and separately kills.
    pub concurrency_limit: usize,

    /// Role this machine takes in development mode.
    pub role: Role,

    /// Private IP this machine registers with in development mode.
    pub private_ip: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from `var`, which maps a variable name to its value.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = var("BERTH_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let tick_interval_secs = var("BERTH_TICK_INTERVAL")
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(60);

        let secret_cache_ttl_secs = var("BERTH_SECRET_CACHE_TTL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let concurrency_limit = var("BERTH_CONCURRENCY_LIMIT")
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(32);

        let role = match var("BERTH_ROLE") {
            Some(s) => s
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid BERTH_ROLE")?,
            None => Role::Worker,
        };

        let private_ip = var("BERTH_PRIVATE_IP").unwrap_or_else(|| "127.0.0.1".to_string());

        Ok(Self {
            log_level,
            tick_interval_secs,
            secret_cache_ttl_secs,
            concurrency_limit,
            role,
            private_ip,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn secret_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.secret_cache_ttl_secs)
    }
}
