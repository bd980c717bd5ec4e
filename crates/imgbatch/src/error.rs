//! Error types for the image batch pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::imaging::{FetchError, TransformError};
use crate::providers::PublishError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed upload body or row
    #[error("Invalid upload: {0}")]
    Validation(String),

    /// Image could not be fetched or decoded
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Image could not be re-encoded
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Artifact could not be written
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Upload body exceeds the configured size limit
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    /// Durable status store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Batch or resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Task join error: {}", err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            Error::Fetch(err) => (StatusCode::BAD_GATEWAY, "fetch_error", err.to_string()),
            Error::Transform(err) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "transform_error", err.to_string())
            }
            Error::Publish(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "publish_error", err.to_string())
            }
            Error::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg.clone())
            }
            Error::Store(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg.clone()),
            Error::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", what.clone()),
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = Error::validation("row 2: no image URLs").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_maps_to_server_error() {
        let response = Error::store("disk full").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_oversize_upload_maps_to_payload_too_large() {
        let response = Error::PayloadTooLarge("limit is 64 bytes".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
