//! Per-request bearer token gate.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::errors::{ApiAuthError, AuthErrorKind};
use super::validator::{BEARER_PREFIX, SessionValidator};

/// Authenticate the request from its `Authorization` header.
///
/// - no header, or not a bearer credential: passes through anonymously
/// - valid bearer token: passes through with a [`super::Principal`] extension
/// - invalid bearer token: 401, the handler never runs
pub async fn authenticate(
    State(validator): State<SessionValidator>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(value) = request.headers().get(header::AUTHORIZATION) else {
        return next.run(request).await;
    };

    // Other schemes may carry opaque bytes, so match the prefix before decoding
    let Some(token) = value.as_bytes().strip_prefix(BEARER_PREFIX.as_bytes()) else {
        return next.run(request).await;
    };

    let Ok(token) = std::str::from_utf8(token) else {
        warn!("Rejected bearer token that is not UTF-8");
        return ApiAuthError::new(AuthErrorKind::InvalidToken).into_response();
    };

    match validator.validate_token(token) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            warn!(reason = %e, "Rejected access token");
            ApiAuthError::new(AuthErrorKind::InvalidToken).into_response()
        }
    }
}
