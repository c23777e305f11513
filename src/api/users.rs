//! Endpoints acting on the caller's own account.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};

use super::auth::presented_token;
use super::error::ApiError;
use crate::auth::{AnyRole, Auth};
use crate::session::{ProfileCompletion, ProfileUpdate, SessionLifecycleService};

#[derive(Clone)]
pub struct UsersState {
    pub sessions: SessionLifecycleService,
}

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route(
            "/",
            post(complete_profile).put(update_profile).delete(delete_self),
        )
        .with_state(state)
}

async fn complete_profile(
    State(state): State<UsersState>,
    _auth: Auth<AnyRole>,
    headers: HeaderMap,
    Json(body): Json<ProfileCompletion>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .sessions
        .complete_profile(presented_token(&headers)?, body)
        .await?;
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<UsersState>,
    _auth: Auth<AnyRole>,
    headers: HeaderMap,
    Json(body): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .sessions
        .update_profile(presented_token(&headers)?, body)
        .await?;
    Ok(Json(profile))
}

async fn delete_self(
    State(state): State<UsersState>,
    _auth: Auth<AnyRole>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.delete_self(presented_token(&headers)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
