//! Error types for the telemetry pipeline.
//!
//! `StoreError` is what the store adapters return. `Error` is the
//! service-level taxonomy; its HTTP mapping lives here so handlers can
//! propagate with `?`.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

/// Failures reaching or using the telemetry store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database driver error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Query did not finish within the adapter's timeout
    #[error("store query timed out after {0} s")]
    Timeout(u64),

    /// Backend refused the request
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Service-level error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request; the caller must correct it
    #[error("{0}")]
    Validation(String),

    /// Read or write against the store failed
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// Live feed lost its connection to the store; retried internally
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // ---
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::StoreUnavailable(_) | Error::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        // ---
        let resp = Error::Validation("helpful must be a boolean".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_failure_maps_to_server_error() {
        // ---
        let err: Error = StoreError::Timeout(5).into();
        assert_eq!(err.to_string(), "store query timed out after 5 s");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
