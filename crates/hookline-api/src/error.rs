//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hookline_core::CampaignError;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid or missing bearer token")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<hookline_common::Error> for ApiError {
    fn from(err: hookline_common::Error) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "Request failed");
            // Store internals stay in the log
            let reason = status.canonical_reason().unwrap_or("Internal Server Error");
            return Self::new(status, err.code(), reason);
        }
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        hookline_common::Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}
