//! Account-facing session endpoints.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::{AnyRole, Auth, bearer_token};
use crate::rate_limit::{RateLimitConfig, rate_limit_auth};
use crate::session::{Registration, SessionLifecycleService};

#[derive(Clone)]
pub struct AuthState {
    pub sessions: SessionLifecycleService,
}

pub fn router(state: AuthState, rate_limit: Option<Arc<RateLimitConfig>>) -> Router {
    let mut credential_routes = Router::new()
        .route("/register", post(register))
        .route("/login", post(login));

    if let Some(config) = rate_limit {
        credential_routes =
            credential_routes.route_layer(middleware::from_fn_with_state(config, rate_limit_auth));
    }

    credential_routes
        .route("/refresh_token", post(refresh))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn register(
    State(state): State<AuthState>,
    Json(body): Json<Registration>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.register(body).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<AuthState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.login(&body.email, &body.password).await?;
    Ok(Json(session))
}

async fn refresh(
    State(state): State<AuthState>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.refresh(&body.refresh_token).await?;
    Ok(Json(session))
}

async fn me(
    State(state): State<AuthState>,
    _auth: Auth<AnyRole>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.sessions.identify(presented_token(&headers)?).await?;
    Ok(Json(profile))
}

async fn logout(
    State(state): State<AuthState>,
    _auth: Auth<AnyRole>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.logout(presented_token(&headers)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The raw access token the middleware already accepted.
pub(super) fn presented_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))
}
