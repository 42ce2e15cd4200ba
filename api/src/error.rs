use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing \"{0}\" parameter")]
    MissingParameter(&'static str),

    #[error("Invalid \"{name}\" parameter: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("Unknown instrument id: {0}")]
    UnknownInstrument(u32),

    #[error("Unknown pair: {0}")]
    UnknownPair(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParameter(_)
            | ApiError::InvalidParameter { .. }
            | ApiError::UnknownInstrument(_)
            | ApiError::UnknownPair(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Upstream(_) => "Failed to fetch data from Supra".to_string(),
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}
