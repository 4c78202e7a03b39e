//! HTTP mapping for engine errors.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use rc_core::AppError;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    /// No or unknown bearer token.
    Unauthenticated,
    App(AppError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthenticated => f.write_str("authentication required"),
            ApiError::App(e) => e.fmt(f),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError::App(e)
    }
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::App(AppError::validation(msg))
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::App(AppError::NotFound(..)) => "not_found",
            ApiError::App(AppError::ValidationError(_)) => "validation",
            ApiError::App(AppError::Upload(_)) => "upload",
            ApiError::App(AppError::Unauthorized(_)) => "unauthorized",
            ApiError::App(AppError::Conflict(_)) => "conflict",
            ApiError::App(AppError::Internal(_)) => "internal",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::App(AppError::NotFound(..)) => StatusCode::NOT_FOUND,
            ApiError::App(AppError::ValidationError(_)) => StatusCode::BAD_REQUEST,
            ApiError::App(AppError::Upload(_)) => StatusCode::BAD_GATEWAY,
            ApiError::App(AppError::Unauthorized(_)) => StatusCode::FORBIDDEN,
            ApiError::App(AppError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::App(AppError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        // Internal details stay in the log.
        let message = match self {
            ApiError::App(AppError::Internal(_)) => "internal error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(status).json(json!({ "error": self.kind(), "message": message }))
    }
}
