use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_INTERVAL_SECS: u32 = 3600;

/// Candle intervals accepted from callers, in seconds.
pub const SUPPORTED_INTERVALS: &[u32] = &[60, 300, 900, 1800, 3600, 14_400, 86_400];

pub fn is_supported_interval(interval_secs: u32) -> bool {
    SUPPORTED_INTERVALS.contains(&interval_secs)
}

/// Identity of one cached series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub interval_secs: u32,
}

impl CacheKey {
    pub fn new(symbol: impl Into<String>, interval_secs: u32) -> Self {
        Self {
            symbol: symbol.into(),
            interval_secs,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.interval_secs)
    }
}

/// Payload of one successful fetch. Replaced wholesale, never mutated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Arc<Value>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(payload: Value, fetched_at: DateTime<Utc>) -> Self {
        Self {
            payload: Arc::new(payload),
            fetched_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    /// Fresh while strictly younger than `window`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) < window
    }
}

/// One outbound history request, built per fetch and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub symbol: String,
    pub interval_secs: u32,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl FetchRequest {
    /// Window ending at `now` and reaching back `lookback`, clamped at the epoch.
    pub fn for_key(key: &CacheKey, now: DateTime<Utc>, lookback: Duration) -> Self {
        let start = now
            .checked_sub_signed(lookback)
            .filter(|start| start.timestamp_millis() >= 0)
            .unwrap_or_default();

        Self {
            symbol: key.symbol.clone(),
            interval_secs: key.interval_secs,
            start_ms: start.timestamp_millis(),
            end_ms: now.timestamp_millis(),
        }
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServedAs {
    FreshHit,
    StaleHit,
    ColdFetch,
}

impl ServedAs {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedAs::FreshHit => "fresh-hit",
            ServedAs::StaleHit => "stale-hit",
            ServedAs::ColdFetch => "cold-fetch",
        }
    }
}

impl fmt::Display for ServedAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub payload: Arc<Value>,
    pub served_as: ServedAs,
}
