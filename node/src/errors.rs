// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::ConfigError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use logpulse_kernel::ValidationError;
use logpulse_persistence::PersistenceError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Malformed record, rejected before buffering.
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),
    /// Backpressure: the buffer stayed full until the caller's deadline.
    #[error("Ingest buffer full")]
    BufferFull,
    #[error("Ingest is shutting down")]
    ShuttingDown,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::BufferFull => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

/// Failures that stop the node from starting.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_error_status() {
        let cases = [
            (IngestError::Validation(ValidationError::EmptyLabelName), StatusCode::BAD_REQUEST),
            (IngestError::BufferFull, StatusCode::SERVICE_UNAVAILABLE),
            (IngestError::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
