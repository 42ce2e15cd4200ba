use dotenv::dotenv;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://prod-kline-rest.supra.com/history";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FRESHNESS_SECS: i64 = 60;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

pub const FRESHNESS_SECS_RANGE: RangeInclusive<i64> = 1..=86_400;
pub const LOOKBACK_DAYS_RANGE: RangeInclusive<i64> = 1..=3_650;

pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub bind_addr: String,
    pub port: u16,
    pub upstream_timeout_secs: u64,
    pub freshness_secs: i64,
    pub lookback_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenv().ok();

        let api_key = std::env::var("SUPRA_API_KEY")
            .map_err(|_| anyhow::anyhow!("SUPRA_API_KEY must be set"))?;

        Ok(Config {
            api_key,
            base_url: std::env::var("SUPRA_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", DEFAULT_PORT),
            upstream_timeout_secs: parse_or("UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS),
            freshness_secs: parse_in_range(
                "CACHE_FRESHNESS_SECS",
                DEFAULT_FRESHNESS_SECS,
                FRESHNESS_SECS_RANGE,
            ),
            lookback_days: parse_in_range(
                "HISTORY_LOOKBACK_DAYS",
                DEFAULT_LOOKBACK_DAYS,
                LOOKBACK_DAYS_RANGE,
            ),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Read an env var and parse it, falling back to `default` when unset or malformed.
fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Like `parse_or`, but out-of-range values are logged and replaced by `default`.
fn parse_in_range<T>(name: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let value = parse_or(name, default);
    if range.contains(&value) {
        value
    } else {
        warn!(
            "{}={} is outside {}..={}, using {}",
            name,
            value,
            range.start(),
            range.end(),
            default
        );
        default
    }
}
