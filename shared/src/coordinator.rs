//! Cache-aside request coordination.
//!
//! Every lookup is answered in one of three ways:
//!
//! - **fresh-hit**: the cached entry is younger than the freshness window and
//!   is returned without touching the network.
//! - **stale-hit**: the cached entry is returned immediately and a detached
//!   task refetches the series in the background.
//! - **cold-fetch**: nothing is cached yet, so the caller waits for the fetch.
//!
//! Failed or empty fetches are never cached. A stale key whose background
//! refresh fails stays stale, so the next lookup tries again.

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::{
    Config, DEFAULT_FRESHNESS_SECS, DEFAULT_LOOKBACK_DAYS, FRESHNESS_SECS_RANGE,
    LOOKBACK_DAYS_RANGE,
};
use crate::error::UpstreamError;
use crate::models::{CacheEntry, CacheKey, FetchRequest, Resolved, ServedAs};
use crate::upstream::{is_empty_payload, HistoryFetcher};
use chrono::Duration;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Entries younger than this are served without a refresh.
    pub freshness_window: Duration,
    /// How far back each fetch reaches.
    pub lookback: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::seconds(DEFAULT_FRESHNESS_SECS),
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
        }
    }
}

impl From<&Config> for CoordinatorConfig {
    /// Out-of-range values keep the defaults.
    fn from(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            freshness_window: if FRESHNESS_SECS_RANGE.contains(&config.freshness_secs) {
                Duration::seconds(config.freshness_secs)
            } else {
                defaults.freshness_window
            },
            lookback: if LOOKBACK_DAYS_RANGE.contains(&config.lookback_days) {
                Duration::days(config.lookback_days)
            } else {
                defaults.lookback
            },
        }
    }
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    /// Keys with a background refresh currently running.
    refreshing: Arc<Mutex<HashSet<CacheKey>>>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CacheStore>, clock: Arc<dyn Clock>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            clock,
            config,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.refreshing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Answer a lookup for `key`, fetching through `fetcher` when needed.
    ///
    /// Only a cold miss can fail; stale hits always succeed and report
    /// background failures through the log alone.
    pub async fn resolve(
        &self,
        key: CacheKey,
        fetcher: Arc<dyn HistoryFetcher>,
    ) -> Result<Resolved, UpstreamError> {
        let now = self.clock.now();

        let resolved = match self.store.get(&key) {
            None => {
                let payload = self.fetch_and_store(&key, fetcher.as_ref()).await?;
                Resolved {
                    payload,
                    served_as: ServedAs::ColdFetch,
                }
            }
            Some(entry) if entry.is_fresh(now, self.config.freshness_window) => Resolved {
                payload: entry.payload,
                served_as: ServedAs::FreshHit,
            },
            Some(entry) => {
                self.spawn_refresh(key.clone(), fetcher);
                Resolved {
                    payload: entry.payload,
                    served_as: ServedAs::StaleHit,
                }
            }
        };

        debug!("{} served as {}", key, resolved.served_as);
        Ok(resolved)
    }

    async fn fetch_and_store(
        &self,
        key: &CacheKey,
        fetcher: &dyn HistoryFetcher,
    ) -> Result<Arc<Value>, UpstreamError> {
        let request = FetchRequest::for_key(key, self.clock.now(), self.config.lookback);
        let payload = fetcher.fetch(&request).await?;

        if is_empty_payload(&payload) {
            return Err(UpstreamError::EmptyResponse {
                symbol: key.symbol.clone(),
            });
        }

        let entry = CacheEntry::new(payload, self.clock.now());
        let payload = entry.payload.clone();
        self.store.put(key.clone(), entry);
        Ok(payload)
    }

    /// Fire-and-forget refresh. At most one runs per key.
    fn spawn_refresh(&self, key: CacheKey, fetcher: Arc<dyn HistoryFetcher>) {
        let Some(guard) = RefreshGuard::acquire(&self.refreshing, &key) else {
            debug!("refresh for {} already in flight", key);
            return;
        };

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match this.fetch_and_store(&key, fetcher.as_ref()).await {
                Ok(_) => info!("background refresh stored {}", key),
                Err(e) => warn!("background refresh failed for {}: {}", key, e),
            }
        });
    }
}

/// Clears the in-flight marker when the refresh task ends, even by panic.
struct RefreshGuard {
    refreshing: Arc<Mutex<HashSet<CacheKey>>>,
    key: CacheKey,
}

impl RefreshGuard {
    fn acquire(refreshing: &Arc<Mutex<HashSet<CacheKey>>>, key: &CacheKey) -> Option<Self> {
        let inserted = refreshing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone());

        inserted.then(|| Self {
            refreshing: refreshing.clone(),
            key: key.clone(),
        })
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.refreshing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Replays queued results; optionally blocks each fetch until released.
    struct ScriptedFetcher {
        results: Mutex<VecDeque<Result<Value, UpstreamError>>>,
        requests: Mutex<Vec<FetchRequest>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedFetcher {
        fn new(results: Vec<Result<Value, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn gated(results: Vec<Result<Value, UpstreamError>>, gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HistoryFetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::fetch_failed(&request.symbol, "script exhausted")))
        }
    }

    fn setup() -> (RefreshCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let coordinator = RefreshCoordinator::new(
            Arc::new(CacheStore::new()),
            clock.clone(),
            CoordinatorConfig::default(),
        );
        (coordinator, clock)
    }

    fn config_with(freshness_secs: i64, lookback_days: i64) -> Config {
        Config {
            api_key: "k".to_string(),
            base_url: "http://127.0.0.1:9/history".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            port: 3000,
            upstream_timeout_secs: 1,
            freshness_secs,
            lookback_days,
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("btc_usdt", 3600)
    }

    async fn wait_until_idle(coordinator: &RefreshCoordinator, key: &CacheKey) {
        for _ in 0..200 {
            if !coordinator.is_refreshing(key) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("background refresh for {} never finished", key);
    }

    #[tokio::test]
    async fn test_cold_fetch_populates_store() {
        let (coordinator, _clock) = setup();
        let fetcher = ScriptedFetcher::new(vec![Ok(json!({"candles": [1, 2]}))]);

        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();

        assert_eq!(resolved.served_as, ServedAs::ColdFetch);
        assert_eq!(*resolved.payload, json!({"candles": [1, 2]}));
        assert_eq!(fetcher.calls(), 1);

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(*entry.payload, json!({"candles": [1, 2]}));
        assert_eq!(entry.fetched_at.timestamp_millis(), 0);
    }

    #[tokio::test]
    async fn test_cold_fetch_builds_thirty_day_window() {
        let (coordinator, clock) = setup();
        clock.advance(Duration::days(31));
        let fetcher = ScriptedFetcher::new(vec![Ok(json!({"candles": []}))]);

        coordinator.resolve(key(), fetcher.clone()).await.unwrap();

        let requests = fetcher.requests.lock().unwrap();
        let now_ms = Duration::days(31).num_milliseconds();
        assert_eq!(requests[0].symbol, "btc_usdt");
        assert_eq!(requests[0].interval_secs, 3600);
        assert_eq!(requests[0].end_ms, now_ms);
        assert_eq!(requests[0].start_ms, now_ms - Duration::days(30).num_milliseconds());
    }

    #[test]
    fn test_config_out_of_range_falls_back_to_defaults() {
        let config = CoordinatorConfig::from(&config_with(-5, 200_000_000));
        assert_eq!(config.freshness_window, Duration::seconds(60));
        assert_eq!(config.lookback, Duration::days(30));

        let config = CoordinatorConfig::from(&config_with(i64::MAX, i64::MIN));
        assert_eq!(config.freshness_window, Duration::seconds(60));
        assert_eq!(config.lookback, Duration::days(30));

        let config = CoordinatorConfig::from(&config_with(5, 365));
        assert_eq!(config.freshness_window, Duration::seconds(5));
        assert_eq!(config.lookback, Duration::days(365));
    }

    #[tokio::test]
    async fn test_oversized_lookback_config_still_serves() {
        let clock = Arc::new(ManualClock::at_epoch());
        let coordinator = RefreshCoordinator::new(
            Arc::new(CacheStore::new()),
            clock,
            CoordinatorConfig::from(&config_with(60, 200_000_000)),
        );
        let fetcher = ScriptedFetcher::new(vec![Ok(json!({"candles": [1]}))]);

        let resolved = tokio::spawn(async move { coordinator.resolve(key(), fetcher).await })
            .await
            .expect("resolve panicked")
            .unwrap();
        assert_eq!(resolved.served_as, ServedAs::ColdFetch);
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_network() {
        let (coordinator, clock) = setup();
        let fetcher = ScriptedFetcher::new(vec![Ok(json!({"candles": [1]}))]);
        coordinator.resolve(key(), fetcher.clone()).await.unwrap();

        clock.advance(Duration::milliseconds(30_000));
        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        assert_eq!(resolved.served_as, ServedAs::FreshHit);
        assert_eq!(*resolved.payload, json!({"candles": [1]}));

        clock.advance(Duration::milliseconds(29_999));
        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        assert_eq!(resolved.served_as, ServedAs::FreshHit);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_hit_serves_old_payload_then_refreshes() {
        let (coordinator, clock) = setup();
        let fetcher = ScriptedFetcher::new(vec![
            Ok(json!({"candles": ["old"]})),
            Ok(json!({"candles": ["new"]})),
        ]);
        coordinator.resolve(key(), fetcher.clone()).await.unwrap();

        clock.set(chrono::DateTime::<chrono::Utc>::default() + Duration::milliseconds(90_000));
        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        assert_eq!(resolved.served_as, ServedAs::StaleHit);
        assert_eq!(*resolved.payload, json!({"candles": ["old"]}));

        wait_until_idle(&coordinator, &key()).await;
        assert_eq!(fetcher.calls(), 2);

        clock.set(chrono::DateTime::<chrono::Utc>::default() + Duration::milliseconds(95_000));
        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        assert_eq!(resolved.served_as, ServedAs::FreshHit);
        assert_eq!(*resolved.payload, json!({"candles": ["new"]}));
        assert_eq!(
            coordinator.store().get(&key()).unwrap().fetched_at.timestamp_millis(),
            90_000
        );
    }

    #[tokio::test]
    async fn test_stale_hit_does_not_wait_for_refresh() {
        let (coordinator, clock) = setup();
        let seed = ScriptedFetcher::new(vec![Ok(json!({"v": 1}))]);
        coordinator.resolve(key(), seed).await.unwrap();
        clock.advance(Duration::seconds(60));

        let gate = Arc::new(Notify::new());
        let slow = ScriptedFetcher::gated(vec![Ok(json!({"v": 2}))], gate.clone());

        let resolved = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            coordinator.resolve(key(), slow.clone()),
        )
        .await
        .expect("stale hit blocked on refresh")
        .unwrap();
        assert_eq!(resolved.served_as, ServedAs::StaleHit);
        assert_eq!(*resolved.payload, json!({"v": 1}));

        gate.notify_one();
        wait_until_idle(&coordinator, &key()).await;
        assert_eq!(*coordinator.store().get(&key()).unwrap().payload, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_one_background_refresh_per_key() {
        let (coordinator, clock) = setup();
        let seed = ScriptedFetcher::new(vec![Ok(json!({"v": 1}))]);
        coordinator.resolve(key(), seed).await.unwrap();
        clock.advance(Duration::minutes(5));

        let gate = Arc::new(Notify::new());
        let slow = ScriptedFetcher::gated(vec![Ok(json!({"v": 2})), Ok(json!({"v": 3}))], gate.clone());

        for _ in 0..3 {
            let resolved = coordinator.resolve(key(), slow.clone()).await.unwrap();
            assert_eq!(resolved.served_as, ServedAs::StaleHit);
        }
        assert!(coordinator.is_refreshing(&key()));

        gate.notify_one();
        wait_until_idle(&coordinator, &key()).await;
        assert_eq!(slow.calls(), 1);
        assert_eq!(*coordinator.store().get(&key()).unwrap().payload, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_entry() {
        let (coordinator, clock) = setup();
        let fetcher = ScriptedFetcher::new(vec![
            Ok(json!({"v": 1})),
            Err(UpstreamError::fetch_failed("btc_usdt", "status 503")),
            Ok(json!({"v": 2})),
        ]);
        coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        clock.advance(Duration::seconds(61));

        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        assert_eq!(resolved.served_as, ServedAs::StaleHit);
        wait_until_idle(&coordinator, &key()).await;

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(*entry.payload, json!({"v": 1}));
        assert_eq!(entry.fetched_at.timestamp_millis(), 0);

        // Still stale, so the next lookup retries.
        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        assert_eq!(resolved.served_as, ServedAs::StaleHit);
        assert_eq!(*resolved.payload, json!({"v": 1}));
        wait_until_idle(&coordinator, &key()).await;

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(*coordinator.store().get(&key()).unwrap().payload, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_empty_refresh_does_not_overwrite() {
        let (coordinator, clock) = setup();
        let fetcher = ScriptedFetcher::new(vec![Ok(json!({"v": 1})), Ok(json!({}))]);
        coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        clock.advance(Duration::seconds(120));

        coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        wait_until_idle(&coordinator, &key()).await;

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(*coordinator.store().get(&key()).unwrap().payload, json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_cold_empty_response_is_an_error() {
        let (coordinator, _clock) = setup();
        let fetcher = ScriptedFetcher::new(vec![Ok(json!({}))]);

        let err = coordinator.resolve(key(), fetcher).await.unwrap_err();

        assert!(err.is_empty_response());
        assert!(coordinator.store().get(&key()).is_none());
    }

    #[tokio::test]
    async fn test_cold_failures_are_not_cached() {
        let (coordinator, _clock) = setup();
        let fetcher = ScriptedFetcher::new(vec![
            Err(UpstreamError::fetch_failed("btc_usdt", "connection reset")),
            Err(UpstreamError::fetch_failed("btc_usdt", "status 429")),
            Ok(json!({"v": 1})),
        ]);

        assert!(coordinator.resolve(key(), fetcher.clone()).await.is_err());
        assert!(coordinator.resolve(key(), fetcher.clone()).await.is_err());
        assert!(coordinator.store().is_empty());

        let resolved = coordinator.resolve(key(), fetcher.clone()).await.unwrap();
        assert_eq!(resolved.served_as, ServedAs::ColdFetch);
        assert_eq!(fetcher.calls(), 3);
    }
}
