//! Scheduled cleanup of expired sessions.

use crate::db::Database;
use crate::jwt::unix_now;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// How long an expired refresh token is kept before the sweep clears it.
/// Until then a refresh with it reports expiry instead of an unknown token.
pub const EXPIRED_SESSION_GRACE_SECS: i64 = 24 * 60 * 60;

/// Clear every session whose refresh token expired more than
/// [`EXPIRED_SESSION_GRACE_SECS`] ago.
pub async fn run_cleanup(db: &Database) {
    let cutoff = unix_now().saturating_sub(EXPIRED_SESSION_GRACE_SECS);
    match db.users().clear_expired_sessions(cutoff).await {
        Ok(count) if count > 0 => info!("Cleared {} expired sessions", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clear expired sessions: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(db: Database) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewAccount, UserRole};

    #[tokio::test]
    async fn test_cleanup_clears_only_stale_sessions() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        let mut ids = Vec::new();
        for (name, phone) in [
            ("alice", "+33611111111"),
            ("bob", "+33622222222"),
            ("carol", "+33633333333"),
        ] {
            let account = users
                .create(&NewAccount {
                    email: format!("{}@example.com", name),
                    username: name.into(),
                    phone_number: phone.into(),
                    password_hash: "hash".into(),
                    role: UserRole::Passenger,
                })
                .await
                .unwrap();
            ids.push(account.id);
        }

        let now = unix_now();
        users
            .store_session(&ids[0], 0, "a", "stale", now - EXPIRED_SESSION_GRACE_SECS - 10)
            .await
            .unwrap();
        users
            .store_session(&ids[1], 0, "b", "just-expired", now - 10)
            .await
            .unwrap();
        users
            .store_session(&ids[2], 0, "c", "live", now + 3600)
            .await
            .unwrap();

        run_cleanup(&db).await;

        assert!(!users.refresh_token_exists("stale").await.unwrap());
        assert!(users.refresh_token_exists("just-expired").await.unwrap());
        assert!(users.refresh_token_exists("live").await.unwrap());
    }
}
