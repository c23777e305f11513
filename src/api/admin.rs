//! Admin API endpoints.
//!
//! All endpoints require admin role.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use super::error::ApiError;
use crate::auth::{AdminOnly, Auth};
use crate::db::UserRole;
use crate::session::SessionLifecycleService;

#[derive(Clone)]
pub struct AdminState {
    pub sessions: SessionLifecycleService,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/users/{email}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .with_state(state)
}

#[derive(Deserialize)]
struct UpdateStatusRequest {
    role: UserRole,
    active: bool,
}

async fn get_user(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.sessions.get_account(&email).await?;
    Ok(Json(profile))
}

/// Change an account's role and active flag.
async fn update_user(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(email): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(admin_id = %auth.principal.account_id, "Admin status update");
    let profile = state
        .sessions
        .update_status(&email, body.role, body.active)
        .await?;
    Ok(Json(profile))
}

async fn delete_user(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(admin_id = %auth.principal.account_id, "Admin account deletion");
    state.sessions.delete_account(&email).await?;
    Ok(StatusCode::NO_CONTENT)
}
