use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// User-facing error messages, centralized so handlers and tests agree.
pub mod msg {
    pub const MISSING_ACCESS_TOKEN: &str =
        "Payment provider access token is not configured";
    pub const INVALID_AMOUNT: &str = "Amount must be positive";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing/invalid credentials. Fatal to payment creation; the operator
    /// has to fix configuration before the register can take QR payments.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider returned a 4xx at creation time (bad credentials, malformed
    /// request). Surfaced to the caller; never raised from poll paths.
    #[error("Gateway rejected: {0}")]
    GatewayRejected(String),

    /// Network failure / timeout / 5xx talking to the provider.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::Configuration(msg) => (
                StatusCode::BAD_REQUEST,
                "Configuration error",
                Some(msg.clone()),
            ),
            AppError::GatewayRejected(msg) => (
                StatusCode::BAD_GATEWAY,
                "Payment provider rejected the request",
                Some(msg.clone()),
            ),
            AppError::GatewayUnavailable(msg) => {
                tracing::warn!("Gateway unavailable: {}", msg);
                (StatusCode::BAD_GATEWAY, "Payment provider unavailable", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
