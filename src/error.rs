//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use crate::statement::UnsafeReason;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Unfixable operation refused under strict policy, before anything ran
    #[error("{reason}")]
    UnsafeOperation {
        reason: UnsafeReason,
        statements: Vec<String>,
    },

    /// Catalog metadata the planner needs is missing or ambiguous
    #[error("Planner precondition failed: {0}")]
    Precondition(String),

    /// A plan statement was rejected by the server. `operation` and
    /// `position` are zero-based; operations before `operation` completed.
    #[error("Operation {operation}, statement {position} failed: {source}")]
    StatementFailed {
        operation: usize,
        position: usize,
        sql: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Connection not established: {0}")]
    NotConnected(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements: Option<Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut statements = None;
        let (status, error_code, message, details) = match &self {
            AppError::UnsafeOperation {
                reason,
                statements: sql,
            } => {
                statements = Some(sql.clone());
                (
                    StatusCode::CONFLICT,
                    "UNSAFE_OPERATION",
                    reason.message(),
                    Some(reason.code().to_string()),
                )
            }
            AppError::Precondition(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "PRECONDITION_FAILED",
                msg.clone(),
                None,
            ),
            AppError::StatementFailed {
                operation,
                position,
                sql,
                source,
            } => {
                error!("Operation {} statement {} failed: {:?}", operation, position, source);
                statements = Some(vec![sql.clone()]);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STATEMENT_FAILED",
                    format!(
                        "Statement {} of operation {} was rejected by the server; {} operations completed",
                        position, operation, operation
                    ),
                    Some(source.to_string()),
                )
            }
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::NotConnected(msg) => (
                StatusCode::BAD_REQUEST,
                "NOT_CONNECTED",
                msg.clone(),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
            statements,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a planner precondition error
pub fn precondition_error(msg: impl Into<String>) -> AppError {
    AppError::Precondition(msg.into())
}
