//! Supra historical kline client.

use crate::error::UpstreamError;
use crate::models::FetchRequest;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Capability to perform one upstream history fetch.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, UpstreamError>;
}

/// A body counts as empty unless it is a JSON object with at least one field.
pub fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Object(map) => map.is_empty(),
        _ => true,
    }
}

#[derive(Debug, Clone)]
pub struct SupraClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SupraClient {
    pub fn new(base_url: String, api_key: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    fn query(request: &FetchRequest) -> [(&'static str, String); 4] {
        [
            ("trading_pair", request.symbol.clone()),
            ("startDate", request.start_ms.to_string()),
            ("endDate", request.end_ms.to_string()),
            ("interval", request.interval_secs.to_string()),
        ]
    }
}

#[async_trait]
impl HistoryFetcher for SupraClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, UpstreamError> {
        let symbol = request.symbol.as_str();
        debug!(
            "GET {} trading_pair={} interval={} range=[{}, {}]",
            self.base_url, symbol, request.interval_secs, request.start_ms, request.end_ms
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&Self::query(request))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| UpstreamError::fetch_failed(symbol, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(UpstreamError::fetch_failed(
                symbol,
                format!("status {}: {}", status, snippet),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::fetch_failed(symbol, e))?;

        if is_empty_payload(&payload) {
            return Err(UpstreamError::EmptyResponse {
                symbol: symbol.to_string(),
            });
        }

        Ok(payload)
    }
}
