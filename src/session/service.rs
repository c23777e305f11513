//! Register, login, refresh, logout and identify, the caller's own profile
//! flows, and the admin account flows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use super::{Profile, Session, SessionError, SessionIssuer};
use crate::auth::SessionValidator;
use crate::db::{Account, AccountChanges, Database, NewAccount, UserRole};
use crate::jwt::unix_now;
use crate::password::{CredentialVerifier, check_password_strength};

/// Longest phone number accepted (E.164 allows 15 digits).
const MAX_PHONE_DIGITS: usize = 15;

/// A registration request.
#[derive(Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone_number: String,
}

/// Profile completion by the account owner.
#[derive(Clone, Default, Deserialize)]
pub struct ProfileCompletion {
    /// Passenger or driver. Admin is refused.
    pub role: Option<UserRole>,
    pub photo_url: Option<String>,
    pub address: Option<String>,
}

/// Profile update by the account owner. Omitted fields stay as they are.
#[derive(Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub photo_url: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone)]
pub struct SessionLifecycleService {
    db: Database,
    issuer: SessionIssuer,
    validator: SessionValidator,
    verifier: Arc<dyn CredentialVerifier>,
    store_timeout: Duration,
}

impl SessionLifecycleService {
    pub fn new(
        db: Database,
        issuer: SessionIssuer,
        validator: SessionValidator,
        verifier: Arc<dyn CredentialVerifier>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            db,
            issuer,
            validator,
            verifier,
            store_timeout,
        }
    }

    pub fn validator(&self) -> &SessionValidator {
        &self.validator
    }

    /// Create an active passenger account and issue its first session.
    pub async fn register(&self, candidate: Registration) -> Result<Session, SessionError> {
        let email = candidate.email.trim();
        let username = candidate.username.trim();
        let phone_number = candidate.phone_number.trim();

        if username.is_empty() {
            return Err(SessionError::Invalid("username is required"));
        }
        if !is_valid_email(email) {
            return Err(SessionError::Invalid("invalid email address"));
        }
        if !is_valid_phone(phone_number) {
            return Err(SessionError::Invalid("invalid phone number"));
        }

        let users = self.db.users();
        if self
            .bounded(users.identity_taken(email, username, phone_number))
            .await?
        {
            return Err(SessionError::AlreadyExists);
        }

        if !check_password_strength(&candidate.password) {
            return Err(SessionError::WeakCredential);
        }

        let password_hash = self.hash(candidate.password).await?;

        let new_account = NewAccount {
            email: email.to_string(),
            username: username.to_string(),
            phone_number: phone_number.to_string(),
            password_hash,
            role: UserRole::Passenger,
        };
        let account = match self
            .bounded(async { Ok::<_, SessionError>(users.create(&new_account).await) })
            .await?
        {
            Ok(account) => account,
            // Lost a race with a concurrent registration
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(SessionError::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        };

        let tokens = self.bounded(self.issuer.issue(&users, &account)).await?;
        info!(account_id = %account.id, "Account registered");

        Ok(Session {
            tokens,
            profile: Profile::from(&account),
        })
    }

    /// Check credentials and replace the account's session.
    ///
    /// Deactivated accounts are rejected before the credential is checked.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let users = self.db.users();
        let account = self
            .bounded(users.get_by_email(email.trim()))
            .await?
            .ok_or(SessionError::NotFound)?;

        if !account.active {
            warn!(account_id = %account.id, "Login attempt on deactivated account");
            return Err(SessionError::InactiveAccount);
        }

        if !self
            .matches(password.to_string(), account.password_hash.clone())
            .await?
        {
            warn!(account_id = %account.id, "Login failed: wrong password");
            return Err(SessionError::InvalidCredential);
        }

        let tokens = self.bounded(self.issuer.issue(&users, &account)).await?;

        let now = unix_now();
        self.bounded(users.record_login(&account.id, now)).await?;
        info!(account_id = %account.id, "Session issued");

        let mut profile = Profile::from(&account);
        profile.last_login_at = Some(now);
        Ok(Session { tokens, profile })
    }

    /// Mint a new access token. The refresh token and its expiry stay as they are.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, SessionError> {
        let users = self.db.users();
        let account = self
            .bounded(users.get_by_refresh_token(refresh_token))
            .await?
            .ok_or(SessionError::NotFound)?;

        match account.refresh_token_expires_at {
            Some(expires_at) if unix_now() < expires_at => {}
            _ => return Err(SessionError::ExpiredRefreshToken),
        }

        let tokens = self
            .bounded(self.issuer.renew_access(&users, &account))
            .await?;

        Ok(Session {
            tokens,
            profile: Profile::from(&account),
        })
    }

    /// Clear the server-side session of the token's account.
    ///
    /// The presented access token itself stays valid until it expires.
    pub async fn logout(&self, access_token: &str) -> Result<(), SessionError> {
        let principal = self.validator.validate_token(access_token)?;

        if !self
            .bounded(self.db.users().clear_session(&principal.account_id))
            .await?
        {
            return Err(SessionError::NotFound);
        }

        info!(account_id = %principal.account_id, "Logged out");
        Ok(())
    }

    /// Resolve an access token to the current profile of its account.
    pub async fn identify(&self, access_token: &str) -> Result<Profile, SessionError> {
        let principal = self.validator.validate_token(access_token)?;
        let account = self.load(&principal.account_id).await?;
        Ok(Profile::from(&account))
    }

    /// Mark the caller's account verified and let it choose passenger or driver.
    pub async fn complete_profile(
        &self,
        access_token: &str,
        completion: ProfileCompletion,
    ) -> Result<Profile, SessionError> {
        let principal = self.validator.validate_token(access_token)?;

        if completion.role == Some(UserRole::Admin) {
            warn!(account_id = %principal.account_id, "Refused self-assigned admin role");
            return Err(SessionError::RoleNotAllowed);
        }

        let account = self
            .bounded(self.db.users().complete_profile(
                &principal.account_id,
                completion.role,
                completion.photo_url.as_deref(),
                completion.address.as_deref(),
            ))
            .await?
            .ok_or(SessionError::NotFound)?;

        info!(account_id = %account.id, role = account.role.as_str(), "Profile completed");
        Ok(Profile::from(&account))
    }

    /// Change the caller's identity or contact fields.
    ///
    /// A request that would leave every field as it is fails with `Invalid`.
    pub async fn update_profile(
        &self,
        access_token: &str,
        update: ProfileUpdate,
    ) -> Result<Profile, SessionError> {
        let principal = self.validator.validate_token(access_token)?;
        let account = self.load(&principal.account_id).await?;

        let changes = profile_changes(&account, update)?;
        if changes.is_empty() {
            return Err(SessionError::Invalid("nothing to update"));
        }

        let users = self.db.users();
        let updated = match self
            .bounded(async {
                Ok::<_, SessionError>(users.update_profile(&account.id, &changes).await)
            })
            .await?
        {
            Ok(Some(account)) => account,
            Ok(None) => return Err(SessionError::NotFound),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(SessionError::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        };

        info!(account_id = %updated.id, "Profile updated");
        Ok(Profile::from(&updated))
    }

    /// Delete the caller's own account.
    pub async fn delete_self(&self, access_token: &str) -> Result<(), SessionError> {
        let principal = self.validator.validate_token(access_token)?;

        if !self
            .bounded(self.db.users().delete_by_id(&principal.account_id))
            .await?
        {
            return Err(SessionError::NotFound);
        }

        info!(account_id = %principal.account_id, "Account deleted by its owner");
        Ok(())
    }

    /// Look up an account by email.
    pub async fn get_account(&self, email: &str) -> Result<Profile, SessionError> {
        let account = self
            .bounded(self.db.users().get_by_email(email))
            .await?
            .ok_or(SessionError::NotFound)?;
        Ok(Profile::from(&account))
    }

    /// Set role and active flag. Deactivation also tears down the session.
    pub async fn update_status(
        &self,
        email: &str,
        role: UserRole,
        active: bool,
    ) -> Result<Profile, SessionError> {
        let account = self
            .bounded(self.db.users().update_status(email, role, active))
            .await?
            .ok_or(SessionError::NotFound)?;

        info!(
            account_id = %account.id,
            role = role.as_str(),
            active,
            "Account status updated"
        );
        Ok(Profile::from(&account))
    }

    pub async fn delete_account(&self, email: &str) -> Result<(), SessionError> {
        if !self.bounded(self.db.users().delete_by_email(email)).await? {
            return Err(SessionError::NotFound);
        }
        info!("Account deleted");
        Ok(())
    }

    async fn load(&self, account_id: &str) -> Result<Account, SessionError> {
        self.bounded(self.db.users().get_by_id(account_id))
            .await?
            .ok_or(SessionError::NotFound)
    }

    /// Run a store-bound future under the configured timeout.
    async fn bounded<T, E>(&self, fut: impl Future<Output = Result<T, E>>) -> Result<T, SessionError>
    where
        E: Into<SessionError>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                error!(timeout_ms = self.store_timeout.as_millis() as u64, "User store timed out");
                Err(SessionError::Store("store timed out".into()))
            }
        }
    }

    async fn hash(&self, password: String) -> Result<String, SessionError> {
        let verifier = self.verifier.clone();
        tokio::task::spawn_blocking(move || verifier.hash(&password))
            .await
            .map_err(|e| {
                error!(error = %e, "Hashing task failed");
                SessionError::Store(e.to_string())
            })?
            .map_err(|e| {
                error!(error = %e, "Failed to hash password");
                SessionError::Store(e.to_string())
            })
    }

    async fn matches(&self, password: String, hash: String) -> Result<bool, SessionError> {
        let verifier = self.verifier.clone();
        tokio::task::spawn_blocking(move || verifier.matches(&password, &hash))
            .await
            .map_err(|e| {
                error!(error = %e, "Verification task failed");
                SessionError::Store(e.to_string())
            })
    }
}

/// Validate an update and keep only the fields that differ from `account`.
fn profile_changes(
    account: &Account,
    update: ProfileUpdate,
) -> Result<AccountChanges, SessionError> {
    let mut changes = AccountChanges::default();

    if let Some(username) = update.username.as_deref().map(str::trim) {
        if username.is_empty() {
            return Err(SessionError::Invalid("username is required"));
        }
        if !username.eq_ignore_ascii_case(&account.username) {
            changes.username = Some(username.to_string());
        }
    }

    if let Some(email) = update.email.as_deref().map(str::trim) {
        if !is_valid_email(email) {
            return Err(SessionError::Invalid("invalid email address"));
        }
        if !email.eq_ignore_ascii_case(&account.email) {
            changes.email = Some(email.to_string());
        }
    }

    if let Some(phone_number) = update.phone_number.as_deref().map(str::trim) {
        if !is_valid_phone(phone_number) {
            return Err(SessionError::Invalid("invalid phone number"));
        }
        if phone_number != account.phone_number {
            changes.phone_number = Some(phone_number.to_string());
        }
    }

    if update.photo_url.is_some() && update.photo_url != account.photo_url {
        changes.photo_url = update.photo_url;
    }
    if update.address.is_some() && update.address != account.address {
        changes.address = update.address;
    }

    Ok(changes)
}

/// A single `@` with something on both sides.
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Optional `+`, then 2 to 15 digits not starting with 0.
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (2..=MAX_PHONE_DIGITS).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}
