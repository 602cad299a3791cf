use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub detail: String,
}

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("no usage recorded for flag {0}")]
    NoUsageRecorded(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FlagError {
    /// Returns (error_code, status_code) for this error.
    fn error_metadata(&self) -> (&'static str, StatusCode) {
        match self {
            FlagError::RequestParsingError(_) => ("request_parsing_error", StatusCode::BAD_REQUEST),
            FlagError::EmptyField(_) => ("empty_field", StatusCode::BAD_REQUEST),
            FlagError::BadRequest(_) => ("bad_request", StatusCode::BAD_REQUEST),
            FlagError::NoUsageRecorded(_) => ("no_usage_recorded", StatusCode::NOT_FOUND),
            FlagError::Store(StoreError::Timeout) => ("store_timeout", StatusCode::SERVICE_UNAVAILABLE),
            FlagError::Store(StoreError::Unavailable(_)) => {
                ("store_unavailable", StatusCode::SERVICE_UNAVAILABLE)
            }
            FlagError::Store(StoreError::Decode { .. }) => {
                ("store_decode_error", StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_metadata().1
    }
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let (code, status) = self.error_metadata();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        } else {
            tracing::debug!(code, error = %self, "rejected request");
        }

        let body = ErrorResponse {
            code,
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
