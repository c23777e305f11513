//! Stateless access token validation.

use std::sync::Arc;

use crate::db::UserRole;
use crate::jwt::{ClaimsCodec, DecodeError};

/// Scheme prefix expected in the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// The authenticated caller attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub account_id: String,
    pub role: UserRole,
}

/// Why an access token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token carries no usable role")]
    MissingRole,
}

impl From<DecodeError> for AuthError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Malformed => AuthError::Malformed,
            DecodeError::BadSignature => AuthError::BadSignature,
            DecodeError::Expired => AuthError::Expired,
        }
    }
}

/// Strip the bearer prefix. Anything else counts as no credential at all.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix(BEARER_PREFIX)
}

/// Turns presented access tokens into principals. Never touches the database,
/// so a token stays valid until it expires even if the session was torn down.
#[derive(Debug, Clone)]
pub struct SessionValidator {
    codec: Arc<ClaimsCodec>,
}

impl SessionValidator {
    pub fn new(codec: Arc<ClaimsCodec>) -> Self {
        Self { codec }
    }

    /// Validate a raw `Authorization` header value.
    ///
    /// Returns `Ok(None)` when the value is not a bearer credential, which
    /// callers treat as an anonymous request.
    pub fn validate(&self, header_value: &str) -> Result<Option<Principal>, AuthError> {
        match bearer_token(header_value) {
            Some(token) => self.validate_token(token).map(Some),
            None => Ok(None),
        }
    }

    /// Validate a bare access token.
    pub fn validate_token(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.codec.decode(token)?;

        let role = claims
            .role
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(AuthError::MissingRole)?;
        let role = UserRole::from_claim(role).ok_or(AuthError::MissingRole)?;

        Ok(Principal {
            account_id: claims.sub,
            role,
        })
    }
}
