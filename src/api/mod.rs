mod admin;
mod auth;
mod error;
mod users;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::auth::{SessionValidator, authenticate};
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionLifecycleService;

pub use error::ApiError;

/// Create the API router. Every route sits behind the authentication middleware.
pub fn create_api_router(
    sessions: SessionLifecycleService,
    validator: SessionValidator,
    rate_limit: Option<Arc<RateLimitConfig>>,
) -> Router {
    let auth_state = auth::AuthState {
        sessions: sessions.clone(),
    };
    let users_state = users::UsersState {
        sessions: sessions.clone(),
    };
    let admin_state = admin::AdminState { sessions };

    Router::new()
        .nest("/auth", auth::router(auth_state, rate_limit))
        .nest("/user", users::router(users_state))
        .nest("/admin", admin::router(admin_state))
        .layer(middleware::from_fn_with_state(validator, authenticate))
}
