use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{find_symbol, is_supported_interval, resolve_symbol, CacheKey};
use tracing::{debug, error};

/// Response header carrying how the lookup was served.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/history", get(history))
        .with_state(state)
}

/// Raw query string values; validated by hand so bad input gets our error body.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "instrumentId")]
    pub instrument_id: Option<String>,
    #[serde(rename = "intervalSeconds")]
    pub interval_seconds: Option<String>,
    /// Legacy: upstream pair name, must be one of the known instruments.
    pub pair: Option<String>,
    /// Legacy alias of `intervalSeconds`.
    pub interval: Option<String>,
}

impl HistoryQuery {
    pub fn cache_key(&self, default_interval: u32) -> Result<CacheKey, ApiError> {
        let symbol = match (non_blank(&self.instrument_id), non_blank(&self.pair)) {
            (Some(raw), _) => {
                let id: u32 = raw.parse().map_err(|_| ApiError::InvalidParameter {
                    name: "instrumentId",
                    value: raw.to_string(),
                })?;
                resolve_symbol(id)
                    .ok_or(ApiError::UnknownInstrument(id))?
                    .to_string()
            }
            (None, Some(pair)) => find_symbol(pair)
                .ok_or_else(|| ApiError::UnknownPair(pair.to_string()))?
                .to_string(),
            (None, None) => return Err(ApiError::MissingParameter("instrumentId")),
        };

        let interval = match non_blank(&self.interval_seconds).or(non_blank(&self.interval)) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(secs) if is_supported_interval(secs) => secs,
                _ => {
                    return Err(ApiError::InvalidParameter {
                        name: "intervalSeconds",
                        value: raw.to_string(),
                    })
                }
            },
            None => default_interval,
        };

        Ok(CacheKey::new(symbol, interval))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let key = query.cache_key(state.default_interval)?;

    let resolved = state
        .coordinator
        .resolve(key.clone(), state.fetcher.clone())
        .await
        .map_err(|e| {
            error!("history lookup for {} failed: {}", key, e);
            ApiError::from(e)
        })?;
    debug!("history {} -> {}", key, resolved.served_as);

    let mut response = Json(resolved.payload).into_response();
    response.headers_mut().insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(resolved.served_as.as_str()),
    );
    Ok(response)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "cached_series": state.coordinator.store().len(),
    }))
}
