use std::net::SocketAddr;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use envconfig::Envconfig;
use tracing::Level;

/// A bool that also accepts the spellings people put in env files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3001")]
    pub address: SocketAddr,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(from = "STORE_TIMEOUT_MS", default = "50")]
    pub store_timeout_ms: u64,

    #[envconfig(from = "CACHE_TTL_SECONDS", default = "300")]
    pub cache_ttl_seconds: f64,

    // 0 keeps every entry until it expires
    #[envconfig(from = "CACHE_MAX_ENTRIES", default = "0")]
    pub cache_max_entries: usize,

    #[envconfig(from = "ANALYTICS_CHANNEL_CAPACITY", default = "10000")]
    pub analytics_channel_capacity: usize,

    #[envconfig(from = "BUSINESS_HOURS_UTC_OFFSET_MINUTES", default = "0")]
    pub business_hours_utc_offset_minutes: i32,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: FlexBool,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "flag-decisions")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub otel_log_level: Level,

    #[envconfig(default = "3")]
    pub otel_export_timeout_secs: u64,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            redis_url: "redis://localhost:6379/".to_string(),
            store_timeout_ms: 50,
            cache_ttl_seconds: 300.0,
            cache_max_entries: 0,
            analytics_channel_capacity: 10_000,
            business_hours_utc_offset_minutes: 0,
            export_prometheus: FlexBool(false),
            debug: FlexBool(false),
            otel_url: None,
            otel_sampling_rate: 1.0,
            otel_service_name: "flag-decisions".to_string(),
            otel_log_level: Level::INFO,
            otel_export_timeout_secs: 3,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Offset used to judge business hours. Out of range offsets fall back to
    /// UTC.
    pub fn business_hours_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.business_hours_utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| {
                tracing::warn!(
                    offset_minutes = self.business_hours_utc_offset_minutes,
                    "business hours offset out of range, using UTC"
                );
                Utc.fix()
            })
    }
}
