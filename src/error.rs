use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::accrual::models::RetryDirective;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Accrual error: {0}")]
    Accrual(#[from] AccrualError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a single failed lookup against the accrual service.
///
/// Only `RateLimited` changes control flow (it adjusts the polling cadence);
/// every other variant is logged by the worker that saw it and the tick
/// moves on to the next order.
#[derive(Error, Debug)]
pub enum AccrualError {
    #[error("Order {order_id} is not registered in the accrual service")]
    OrderNotRegistered { order_id: String },

    #[error("Accrual service is rate limiting requests: {0}")]
    RateLimited(RetryDirective),

    #[error("Accrual service failed to process order {order_id}")]
    ProviderServerError { order_id: String },

    #[error("Unexpected response {status} from accrual service for order {order_id}")]
    ProviderProtocolError { order_id: String, status: u16 },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Order id must not be empty")]
    EmptyOrderId,
}

impl AccrualError {
    /// Backpressure signal carried by this error, if any
    pub fn retry_directive(&self) -> Option<RetryDirective> {
        match self {
            AccrualError::RateLimited(directive) => Some(*directive),
            _ => None,
        }
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Database(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            AppError::InvalidInput(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                reason.clone(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
