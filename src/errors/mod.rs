//! Error types shared across the gateway.
//!
//! Provider-level failures live in [`crate::core::provider`]; store failures in
//! [`crate::store`]. This module defines the application-facing error type used
//! by the HTTP handlers plus the authentication error type.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::core::provider::ProviderError;
use crate::store::StoreError;

/// Result alias for handler-level operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors surfaced by the HTTP admin handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Errors raised while creating or validating auth tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to create token: {0}")]
    TokenCreation(String),

    #[error("invalid or expired token")]
    InvalidToken,
}
