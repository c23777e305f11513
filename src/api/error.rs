//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::session::SessionError;

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let msg = e.to_string();
        match e {
            SessionError::AlreadyExists | SessionError::Conflict => ApiError::Conflict(msg),
            SessionError::WeakCredential | SessionError::Invalid(_) => ApiError::BadRequest(msg),
            SessionError::InvalidCredential | SessionError::ExpiredRefreshToken => {
                ApiError::Unauthorized(msg)
            }
            SessionError::Auth(_) => ApiError::Unauthorized("Invalid or expired token".into()),
            SessionError::InactiveAccount | SessionError::RoleNotAllowed => {
                ApiError::Forbidden(msg)
            }
            SessionError::NotFound => ApiError::NotFound(msg),
            // Already logged where it happened
            SessionError::Store(_) => ApiError::Internal("Internal server error".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
