//! Produces and persists new sessions.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, warn};

use super::{SessionError, SessionTokens};
use crate::db::{Account, SessionWrite, UserStore};
use crate::jwt::{ClaimsCodec, unix_now};
use crate::token::TokenSource;

/// Upper bound on refresh token draws for a single issuance.
pub const MAX_ISSUE_ATTEMPTS: u32 = 5;

/// The store operations a full issuance needs.
pub trait SessionStore: Send + Sync {
    fn refresh_token_exists(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn store_session(
        &self,
        id: &str,
        expected_version: i64,
        access_token: &str,
        refresh_token: &str,
        refresh_token_expires_at: i64,
    ) -> impl Future<Output = Result<SessionWrite, sqlx::Error>> + Send;
}

impl SessionStore for UserStore {
    fn refresh_token_exists(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send {
        UserStore::refresh_token_exists(self, token)
    }

    fn store_session(
        &self,
        id: &str,
        expected_version: i64,
        access_token: &str,
        refresh_token: &str,
        refresh_token_expires_at: i64,
    ) -> impl Future<Output = Result<SessionWrite, sqlx::Error>> + Send {
        UserStore::store_session(
            self,
            id,
            expected_version,
            access_token,
            refresh_token,
            refresh_token_expires_at,
        )
    }
}

#[derive(Clone)]
pub struct SessionIssuer {
    codec: Arc<ClaimsCodec>,
    tokens: Arc<dyn TokenSource>,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl SessionIssuer {
    pub fn new(
        codec: Arc<ClaimsCodec>,
        tokens: Arc<dyn TokenSource>,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        Self {
            codec,
            tokens,
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn codec(&self) -> &Arc<ClaimsCodec> {
        &self.codec
    }

    /// Issue a full session for `account` and write it onto the account row.
    ///
    /// The write is conditional on the `session_version` carried by `account`;
    /// if another writer got there first this fails with [`SessionError::Conflict`].
    /// A candidate refresh token is only persisted once the store reports it
    /// unused, and a unique violation at write time (two issuers racing with
    /// the same candidate) causes a fresh draw.
    pub async fn issue<S: SessionStore>(
        &self,
        users: &S,
        account: &Account,
    ) -> Result<SessionTokens, SessionError> {
        let now = unix_now();
        let access_token = self.encode_access(account, now)?;
        let refresh_token_expires_at = now.saturating_add(self.refresh_ttl_secs);

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let candidate = self.tokens.generate();

            if users.refresh_token_exists(&candidate).await? {
                warn!(attempt, "Refresh token collision, drawing again");
                continue;
            }

            match users
                .store_session(
                    &account.id,
                    account.session_version,
                    &access_token,
                    &candidate,
                    refresh_token_expires_at,
                )
                .await?
            {
                SessionWrite::Stored { .. } => {
                    return Ok(SessionTokens {
                        access_token,
                        refresh_token: candidate,
                        refresh_token_expires_at,
                    });
                }
                SessionWrite::VersionMismatch => return Err(SessionError::Conflict),
                SessionWrite::RefreshTokenTaken => {
                    warn!(attempt, "Refresh token claimed concurrently, drawing again");
                }
            }
        }

        error!(
            attempts = MAX_ISSUE_ATTEMPTS,
            "Could not draw an unused refresh token"
        );
        Err(SessionError::Store("refresh token generation exhausted".into()))
    }

    /// Re-encode only the access token for `account`, leaving its refresh
    /// token and expiry untouched.
    pub async fn renew_access(
        &self,
        users: &UserStore,
        account: &Account,
    ) -> Result<SessionTokens, SessionError> {
        let (Some(refresh_token), Some(refresh_token_expires_at)) =
            (&account.refresh_token, account.refresh_token_expires_at)
        else {
            return Err(SessionError::NotFound);
        };

        let access_token = self.encode_access(account, unix_now())?;

        match users
            .store_access_token(&account.id, account.session_version, &access_token)
            .await?
        {
            SessionWrite::Stored { .. } => Ok(SessionTokens {
                access_token,
                refresh_token: refresh_token.clone(),
                refresh_token_expires_at,
            }),
            _ => Err(SessionError::Conflict),
        }
    }

    fn encode_access(&self, account: &Account, now: i64) -> Result<String, SessionError> {
        self.codec
            .encode(&account.id, account.role, now, self.access_ttl_secs)
            .map_err(|e| {
                error!(error = %e, "Failed to encode access token");
                SessionError::Store(e.to_string())
            })
    }
}
