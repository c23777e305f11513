//! Account storage, including the per-account session block.
//!
//! Session fields (`access_token`, `refresh_token`, `refresh_token_expires_at`)
//! are only written through the methods below, each of which bumps
//! `session_version`. Conditional writers pass the version they read and get
//! [`SessionWrite::VersionMismatch`] back if somebody else got there first.

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Passenger,
    Driver,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Passenger => "passenger",
            UserRole::Driver => "driver",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            "driver" => UserRole::Driver,
            _ => UserRole::Passenger,
        }
    }

    /// Canonical form carried in access token claims.
    pub fn as_claim(&self) -> &'static str {
        match self {
            UserRole::Passenger => "ROLE_PASSENGER",
            UserRole::Driver => "ROLE_DRIVER",
            UserRole::Admin => "ROLE_ADMIN",
        }
    }

    /// Parse a role claim, with or without the `ROLE_` prefix, ignoring case.
    pub fn from_claim(claim: &str) -> Option<Self> {
        let claim = claim.trim();
        let name = match claim.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("ROLE_") => &claim[5..],
            _ => claim,
        };

        [UserRole::Passenger, UserRole::Driver, UserRole::Admin]
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub username: String,
    pub phone_number: String,
    pub password_hash: String,
    pub role: UserRole,
    pub active: bool,
    pub verified: bool,
    pub photo_url: Option<String>,
    pub address: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Unix seconds
    pub refresh_token_expires_at: Option<i64>,
    /// Unix seconds
    pub last_login_at: Option<i64>,
    pub session_version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    email: String,
    username: String,
    phone_number: String,
    password_hash: String,
    role: String,
    active: i32,
    verified: i32,
    photo_url: Option<String>,
    address: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    refresh_token_expires_at: Option<i64>,
    last_login_at: Option<i64>,
    session_version: i64,
    created_at: String,
    updated_at: String,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            username: row.username,
            phone_number: row.phone_number,
            password_hash: row.password_hash,
            role: UserRole::from_str(&row.role),
            active: row.active != 0,
            verified: row.verified != 0,
            photo_url: row.photo_url,
            address: row.address,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            refresh_token_expires_at: row.refresh_token_expires_at,
            last_login_at: row.last_login_at,
            session_version: row.session_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

macro_rules! select_account {
    ($predicate:literal) => {
        concat!(
            "SELECT id, email, username, phone_number, password_hash, role, active, verified, ",
            "photo_url, address, ",
            "access_token, refresh_token, refresh_token_expires_at, last_login_at, ",
            "session_version, created_at, updated_at FROM users WHERE ",
            $predicate
        )
    };
}

/// Fields needed to create an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub username: String,
    pub phone_number: String,
    pub password_hash: String,
    pub role: UserRole,
}

/// Profile fields to overwrite. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub photo_url: Option<String>,
    pub address: Option<String>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Outcome of a conditional session write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionWrite {
    /// Written; carries the new session version.
    Stored { version: i64 },
    /// The account's session version moved (or the account is gone).
    VersionMismatch,
    /// Another account already holds this refresh token.
    RefreshTokenTaken,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new active, unverified account.
    pub async fn create(&self, account: &NewAccount) -> Result<Account, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO users (id, email, username, phone_number, password_hash, role, active, verified)
             VALUES (?, ?, ?, ?, ?, ?, 1, 0)",
        )
        .bind(&id)
        .bind(&account.email)
        .bind(&account.username)
        .bind(&account.phone_number)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Get an account by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(select_account!("id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    /// Get an account by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(select_account!("email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    /// Get the account currently holding a refresh token.
    pub async fn get_by_refresh_token(&self, token: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(select_account!("refresh_token = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    /// Check whether any of the unique identity fields is already in use.
    pub async fn identity_taken(
        &self,
        email: &str,
        username: &str,
        phone_number: &str,
    ) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE email = ? OR username = ? OR phone_number = ?",
        )
        .bind(email)
        .bind(username)
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 > 0)
    }

    /// Check if any account holds the given refresh token.
    pub async fn refresh_token_exists(&self, token: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE refresh_token = ?")
            .bind(token)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Replace the whole session block if the session version is unchanged.
    pub async fn store_session(
        &self,
        id: &str,
        expected_version: i64,
        access_token: &str,
        refresh_token: &str,
        refresh_token_expires_at: i64,
    ) -> Result<SessionWrite, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET access_token = ?, refresh_token = ?, refresh_token_expires_at = ?,
                 session_version = session_version + 1, updated_at = datetime('now')
             WHERE id = ? AND session_version = ?",
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(refresh_token_expires_at)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() > 0 => Ok(SessionWrite::Stored {
                version: expected_version + 1,
            }),
            Ok(_) => Ok(SessionWrite::VersionMismatch),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(SessionWrite::RefreshTokenTaken)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace only the access token, leaving the refresh token and its expiry alone.
    pub async fn store_access_token(
        &self,
        id: &str,
        expected_version: i64,
        access_token: &str,
    ) -> Result<SessionWrite, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET access_token = ?, session_version = session_version + 1,
                 updated_at = datetime('now')
             WHERE id = ? AND session_version = ?",
        )
        .bind(access_token)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(SessionWrite::Stored {
                version: expected_version + 1,
            })
        } else {
            Ok(SessionWrite::VersionMismatch)
        }
    }

    /// Null all session fields (logout). Unconditional.
    pub async fn clear_session(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET access_token = NULL, refresh_token = NULL,
                 refresh_token_expires_at = NULL, session_version = session_version + 1,
                 updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful login time (Unix seconds).
    pub async fn record_login(&self, id: &str, at: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set role and active flag. Deactivating also clears the session block.
    pub async fn update_status(
        &self,
        email: &str,
        role: UserRole,
        active: bool,
    ) -> Result<Option<Account>, sqlx::Error> {
        let active = active as i32;
        let result = sqlx::query(
            "UPDATE users SET role = ?, active = ?,
                 access_token = CASE WHEN ? THEN access_token ELSE NULL END,
                 refresh_token = CASE WHEN ? THEN refresh_token ELSE NULL END,
                 refresh_token_expires_at = CASE WHEN ? THEN refresh_token_expires_at ELSE NULL END,
                 session_version = session_version + 1, updated_at = datetime('now')
             WHERE email = ?",
        )
        .bind(role.as_str())
        .bind(active)
        .bind(active)
        .bind(active)
        .bind(active)
        .bind(email)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_email(email).await
    }

    /// Mark the account verified, optionally setting its role and contact details.
    pub async fn complete_profile(
        &self,
        id: &str,
        role: Option<UserRole>,
        photo_url: Option<&str>,
        address: Option<&str>,
    ) -> Result<Option<Account>, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET role = COALESCE(?, role), photo_url = COALESCE(?, photo_url),
                 address = COALESCE(?, address), verified = 1, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(role.map(|r| r.as_str()))
        .bind(photo_url)
        .bind(address)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    /// Overwrite the given profile fields. Fails with a unique violation if
    /// the new email, username or phone number belongs to another account.
    pub async fn update_profile(
        &self,
        id: &str,
        changes: &AccountChanges,
    ) -> Result<Option<Account>, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET email = COALESCE(?, email), username = COALESCE(?, username),
                 phone_number = COALESCE(?, phone_number), photo_url = COALESCE(?, photo_url),
                 address = COALESCE(?, address), updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(changes.email.as_deref())
        .bind(changes.username.as_deref())
        .bind(changes.phone_number.as_deref())
        .bind(changes.photo_url.as_deref())
        .bind(changes.address.as_deref())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    /// Delete an account by ID.
    pub async fn delete_by_id(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete an account by email.
    pub async fn delete_by_email(&self, email: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE email = ?")
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear sessions whose refresh token expired before `cutoff` (Unix seconds).
    pub async fn clear_expired_sessions(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET access_token = NULL, refresh_token = NULL,
                 refresh_token_expires_at = NULL, session_version = session_version + 1
             WHERE refresh_token_expires_at IS NOT NULL AND refresh_token_expires_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Check whether any admin account exists.
    pub async fn admin_exists(&self) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> (Database, Account, Account) {
        let db = Database::open(":memory:").await.unwrap();
        let alice = db
            .users()
            .create(&NewAccount {
                email: "alice@example.com".into(),
                username: "alice".into(),
                phone_number: "+33611111111".into(),
                password_hash: "hash".into(),
                role: UserRole::Passenger,
            })
            .await
            .unwrap();
        let bob = db
            .users()
            .create(&NewAccount {
                email: "bob@example.com".into(),
                username: "bob".into(),
                phone_number: "+33622222222".into(),
                password_hash: "hash".into(),
                role: UserRole::Driver,
            })
            .await
            .unwrap();
        (db, alice, bob)
    }

    #[test]
    fn test_role_from_claim() {
        assert_eq!(UserRole::from_claim("ROLE_ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::from_claim("DRIVER"), Some(UserRole::Driver));
        assert_eq!(UserRole::from_claim("role_passenger"), Some(UserRole::Passenger));
        assert_eq!(UserRole::from_claim("passenger"), Some(UserRole::Passenger));
        assert_eq!(UserRole::from_claim("ROLE_"), None);
        assert_eq!(UserRole::from_claim("ROLE_PILOT"), None);
        assert_eq!(UserRole::from_claim(""), None);
    }

    #[test]
    fn test_role_claim_roundtrip() {
        for role in [UserRole::Passenger, UserRole::Driver, UserRole::Admin] {
            assert_eq!(UserRole::from_claim(role.as_claim()), Some(role));
            assert_eq!(UserRole::from_str(role.as_str()), role);
        }
    }

    #[tokio::test]
    async fn test_store_session_and_lookup() {
        let (db, alice, _) = setup().await;
        let users = db.users();

        let write = users
            .store_session(&alice.id, alice.session_version, "access", "refresh-a", 1000)
            .await
            .unwrap();
        assert_eq!(write, SessionWrite::Stored { version: 1 });

        assert!(users.refresh_token_exists("refresh-a").await.unwrap());
        let found = users.get_by_refresh_token("refresh-a").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert_eq!(found.access_token.as_deref(), Some("access"));
        assert_eq!(found.refresh_token_expires_at, Some(1000));
        assert_eq!(found.session_version, 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let (db, alice, _) = setup().await;
        let users = db.users();

        users
            .store_session(&alice.id, 0, "access-1", "refresh-1", 1000)
            .await
            .unwrap();
        let write = users
            .store_session(&alice.id, 0, "access-2", "refresh-2", 1000)
            .await
            .unwrap();
        assert_eq!(write, SessionWrite::VersionMismatch);

        let write = users.store_access_token(&alice.id, 0, "access-3").await.unwrap();
        assert_eq!(write, SessionWrite::VersionMismatch);

        let current = users.get_by_id(&alice.id).await.unwrap().unwrap();
        assert_eq!(current.access_token.as_deref(), Some("access-1"));
        assert_eq!(current.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_token_shared_across_accounts_is_rejected() {
        let (db, alice, bob) = setup().await;
        let users = db.users();

        users
            .store_session(&alice.id, 0, "access-a", "same", 1000)
            .await
            .unwrap();
        let write = users
            .store_session(&bob.id, 0, "access-b", "same", 1000)
            .await
            .unwrap();
        assert_eq!(write, SessionWrite::RefreshTokenTaken);

        let bob = users.get_by_id(&bob.id).await.unwrap().unwrap();
        assert!(bob.refresh_token.is_none());
        assert_eq!(bob.session_version, 0);
    }

    #[tokio::test]
    async fn test_store_access_token_keeps_refresh_fields() {
        let (db, alice, _) = setup().await;
        let users = db.users();

        users
            .store_session(&alice.id, 0, "access-1", "refresh-1", 1234)
            .await
            .unwrap();
        let write = users.store_access_token(&alice.id, 1, "access-2").await.unwrap();
        assert_eq!(write, SessionWrite::Stored { version: 2 });

        let current = users.get_by_id(&alice.id).await.unwrap().unwrap();
        assert_eq!(current.access_token.as_deref(), Some("access-2"));
        assert_eq!(current.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(current.refresh_token_expires_at, Some(1234));
    }

    #[tokio::test]
    async fn test_clear_session() {
        let (db, alice, _) = setup().await;
        let users = db.users();

        users
            .store_session(&alice.id, 0, "access", "refresh", 1000)
            .await
            .unwrap();
        assert!(users.clear_session(&alice.id).await.unwrap());

        let current = users.get_by_id(&alice.id).await.unwrap().unwrap();
        assert!(current.access_token.is_none());
        assert!(current.refresh_token.is_none());
        assert!(current.refresh_token_expires_at.is_none());
        assert!(!users.refresh_token_exists("refresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_deactivation_clears_session() {
        let (db, alice, _) = setup().await;
        let users = db.users();

        users
            .store_session(&alice.id, 0, "access", "refresh", 1000)
            .await
            .unwrap();

        let updated = users
            .update_status("alice@example.com", UserRole::Driver, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.role, UserRole::Driver);
        assert_eq!(updated.refresh_token.as_deref(), Some("refresh"));

        let updated = users
            .update_status("alice@example.com", UserRole::Driver, false)
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.active);
        assert!(updated.access_token.is_none());
        assert!(updated.refresh_token.is_none());

        assert!(
            users
                .update_status("nobody@example.com", UserRole::Admin, true)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_complete_profile_verifies() {
        let (db, alice, _) = setup().await;
        let users = db.users();
        assert!(!alice.verified);

        let updated = users
            .complete_profile(&alice.id, Some(UserRole::Driver), Some("https://img/a.png"), None)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.verified);
        assert_eq!(updated.role, UserRole::Driver);
        assert_eq!(updated.photo_url.as_deref(), Some("https://img/a.png"));
        assert!(updated.address.is_none());

        // Omitted fields are kept
        let updated = users
            .complete_profile(&alice.id, None, None, Some("1 rue de la Paix"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.role, UserRole::Driver);
        assert_eq!(updated.photo_url.as_deref(), Some("https://img/a.png"));
        assert_eq!(updated.address.as_deref(), Some("1 rue de la Paix"));

        assert!(
            users
                .complete_profile("missing", None, None, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_profile() {
        let (db, alice, _) = setup().await;
        let users = db.users();

        let changes = AccountChanges {
            username: Some("alicia".into()),
            ..Default::default()
        };
        let updated = users.update_profile(&alice.id, &changes).await.unwrap().unwrap();
        assert_eq!(updated.username, "alicia");
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.phone_number, "+33611111111");

        // Bob's phone number is taken
        let changes = AccountChanges {
            phone_number: Some("+33622222222".into()),
            ..Default::default()
        };
        match users.update_profile(&alice.id, &changes).await {
            Err(sqlx::Error::Database(e)) => assert!(e.is_unique_violation()),
            other => panic!("expected unique violation, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let (db, alice, bob) = setup().await;
        let users = db.users();

        assert!(users.delete_by_id(&alice.id).await.unwrap());
        assert!(!users.delete_by_id(&alice.id).await.unwrap());
        assert!(users.get_by_id(&bob.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_expired_sessions() {
        let (db, alice, bob) = setup().await;
        let users = db.users();

        users
            .store_session(&alice.id, 0, "access-a", "refresh-a", 100)
            .await
            .unwrap();
        users
            .store_session(&bob.id, 0, "access-b", "refresh-b", 300)
            .await
            .unwrap();

        assert_eq!(users.clear_expired_sessions(200).await.unwrap(), 1);

        assert!(!users.refresh_token_exists("refresh-a").await.unwrap());
        assert!(users.refresh_token_exists("refresh-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_login_and_admin_exists() {
        let (db, alice, _) = setup().await;
        let users = db.users();

        assert!(users.record_login(&alice.id, 42).await.unwrap());
        let current = users.get_by_id(&alice.id).await.unwrap().unwrap();
        assert_eq!(current.last_login_at, Some(42));

        assert!(!users.admin_exists().await.unwrap());
        users
            .update_status("alice@example.com", UserRole::Admin, true)
            .await
            .unwrap();
        assert!(users.admin_exists().await.unwrap());
    }
}
