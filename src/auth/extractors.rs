//! Axum extractors for role-gated handlers.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::validator::Principal;
use crate::db::UserRole;

/// Decides which roles may use a route.
pub trait RoleConstraint: Send + Sync {
    fn allows(role: UserRole) -> bool;
}

/// Any authenticated caller.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_role: UserRole) -> bool {
        true
    }
}

/// Admins only.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::Admin
    }
}

/// Principal attached by the authentication middleware, checked against `R`.
///
/// Rejects with 401 when the request is anonymous and 403 when the role is
/// not allowed.
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub principal: Principal,
    _role: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ApiAuthError::new(AuthErrorKind::NotAuthenticated))?;

        if !R::allows(principal.role) {
            return Err(ApiAuthError::new(AuthErrorKind::InsufficientRole));
        }

        Ok(Auth {
            principal,
            _role: PhantomData,
        })
    }
}
