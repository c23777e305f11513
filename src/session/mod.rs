//! Session issuance and the account-facing lifecycle flows.
//!
//! A session is the `(access token, refresh token, refresh expiry)` triple
//! stored on the account row. Access tokens are stateless and checked by
//! signature alone; refresh tokens are opaque and only mean something when
//! looked up in the store.

mod issuer;
mod service;

pub use issuer::{MAX_ISSUE_ATTEMPTS, SessionIssuer, SessionStore};
pub use service::{ProfileCompletion, ProfileUpdate, Registration, SessionLifecycleService};

use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::db::{Account, UserRole};

/// Freshly issued or renewed session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub refresh_token_expires_at: i64,
}

/// Read projection of an account, safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub phone_number: String,
    pub role: UserRole,
    pub active: bool,
    pub verified: bool,
    pub photo_url: Option<String>,
    pub address: Option<String>,
    pub last_login_at: Option<i64>,
    pub created_at: String,
}

impl From<&Account> for Profile {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            username: account.username.clone(),
            phone_number: account.phone_number.clone(),
            role: account.role,
            active: account.active,
            verified: account.verified,
            photo_url: account.photo_url.clone(),
            address: account.address.clone(),
            last_login_at: account.last_login_at,
            created_at: account.created_at.clone(),
        }
    }
}

/// Tokens plus the profile of the account they belong to.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(flatten)]
    pub tokens: SessionTokens,
    pub profile: Profile,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("account not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredential,
    #[error("account is deactivated")]
    InactiveAccount,
    #[error("an account with this email, username or phone number already exists")]
    AlreadyExists,
    #[error("{0}")]
    Invalid(&'static str),
    #[error("this role cannot be self-assigned")]
    RoleNotAllowed,
    #[error("password does not meet the policy")]
    WeakCredential,
    #[error("refresh token has expired")]
    ExpiredRefreshToken,
    /// Somebody else changed the session block in between. Retryable.
    #[error("session was modified concurrently")]
    Conflict,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        error!(error = %e, "User store failure");
        SessionError::Store(e.to_string())
    }
}
