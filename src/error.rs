//! Closed error taxonomy surfaced to HTTP callers.
//!
//! Every rejection on the validate path collapses into `invalid_key` so the
//! response does not leak which aspect failed; the audit stream keeps the
//! true reason.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid or expired API key")]
    InvalidKey,
    #[error("API key not found")]
    KeyNotFound,
    #[error("Project already exists")]
    ProjectExists,
    #[error("Project not found")]
    ProjectNotFound,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Storage(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidKey => "invalid_key",
            ApiError::KeyNotFound => "key_not_found",
            ApiError::ProjectExists => "project_exists",
            ApiError::ProjectNotFound => "project_not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Storage(_) => "storage_error",
            ApiError::Internal => "internal_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidKey => StatusCode::UNAUTHORIZED,
            ApiError::KeyNotFound | ApiError::ProjectNotFound => StatusCode::NOT_FOUND,
            ApiError::ProjectExists => StatusCode::CONFLICT,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        error_envelope(self.status_code(), self.code(), &self.to_string())
    }
}

/// Build a JSON error response in the standard envelope.
pub fn error_envelope(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": { "code": code, "message": message } });
    HttpResponse::build(status).json(body)
}
