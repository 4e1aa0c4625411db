//! Boundary error type. Every handler and extractor failure is turned into
//! a status code and a JSON body here.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::{jwt::TokenError, repo::StoreError, reset::ResetError};

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation.
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials or a missing, invalid or expired bearer token.
    #[error("{0}")]
    Unauthenticated(String),

    /// Known identity, insufficient role.
    #[error("{0}")]
    Forbidden(String),

    /// Notification sink failed.
    #[error("{0}")]
    Delivery(String),

    /// Password reset token is unknown or expired.
    #[error("Invalid or expired reset token")]
    InvalidResetToken,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidResetToken => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Delivery(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(email) => Self::Conflict(format!("Email {email} is already registered")),
            StoreError::NotFound(_) => Self::NotFound("User not found".into()),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid => Self::Unauthenticated("Invalid or expired token".into()),
            TokenError::Signing(_) => Self::Internal(e.into()),
        }
    }
}

impl From<ResetError> for AppError {
    fn from(e: ResetError) -> Self {
        match e {
            ResetError::Invalid => Self::InvalidResetToken,
            ResetError::Store(s) => s.into(),
            ResetError::Hash(h) => Self::Internal(h),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Internal(e) => {
                error!(error = %e, "internal error");
                "Internal server error".to_string()
            }
            Self::Delivery(msg) => {
                error!(error = %msg, "delivery error");
                msg.clone()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}
