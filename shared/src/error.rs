//! Upstream failure taxonomy.

use thiserror::Error;

/// Failure of a single upstream history fetch.
///
/// Neither variant is ever written to the cache.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Transport error, non-2xx status, or undecodable body.
    #[error("upstream fetch failed for {symbol}: {reason}")]
    FetchFailed { symbol: String, reason: String },

    /// 2xx response whose JSON body has no top-level fields.
    #[error("upstream returned an empty response for {symbol}")]
    EmptyResponse { symbol: String },
}

impl UpstreamError {
    pub fn fetch_failed(symbol: impl Into<String>, reason: impl ToString) -> Self {
        Self::FetchFailed {
            symbol: symbol.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_empty_response(&self) -> bool {
        matches!(self, Self::EmptyResponse { .. })
    }
}
