use shared::{
    CacheStore, Config, CoordinatorConfig, HistoryFetcher, RefreshCoordinator, SupraClient,
    SystemClock, DEFAULT_INTERVAL_SECS,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RefreshCoordinator,
    pub fetcher: Arc<dyn HistoryFetcher>,
    pub default_interval: u32,
}

impl AppState {
    pub fn new(coordinator: RefreshCoordinator, fetcher: Arc<dyn HistoryFetcher>) -> Self {
        Self {
            coordinator,
            fetcher,
            default_interval: DEFAULT_INTERVAL_SECS,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, anyhow::Error> {
        let fetcher = SupraClient::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.upstream_timeout_secs,
        )?;
        tracing::info!(
            "Upstream client ready: {} (timeout {}s)",
            config.base_url,
            config.upstream_timeout_secs
        );

        let coordinator = RefreshCoordinator::new(
            Arc::new(CacheStore::new()),
            Arc::new(SystemClock),
            CoordinatorConfig::from(config),
        );

        Ok(Self::new(coordinator, Arc::new(fetcher)))
    }
}
