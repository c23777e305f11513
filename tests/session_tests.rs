//! Tests for refresh token uniqueness under collisions and concurrency.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use ridepool::build_sessions;
use ridepool::db::Database;
use ridepool::session::{Registration, SessionError};
use ridepool::token::OpaqueTokenGenerator;

fn registration(i: usize) -> Registration {
    Registration {
        username: format!("user{}", i),
        email: format!("user{}@example.com", i),
        password: PASSWORD.to_string(),
        phone_number: format!("+3361{:07}", i),
    }
}

#[tokio::test]
async fn test_simulated_collision_produces_distinct_tokens() {
    // Both registrations draw "collide" first
    let (app, db) = create_test_app_with_tokens(ScriptedTokens::new(&[
        "collide", "collide", "distinct",
    ]))
    .await;

    let alice = register(&app, "alice", "+33611111111").await;
    let bob = register(&app, "bob", "+33622222222").await;

    assert_eq!(str_field(&alice, "refresh_token"), "collide");
    assert_eq!(str_field(&bob, "refresh_token"), "distinct");

    let holder = db
        .users()
        .get_by_refresh_token("collide")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(holder.email, "alice@example.com");
}

#[tokio::test]
async fn test_collision_exhaustion_is_a_store_error() {
    let db = Database::open(":memory:").await.unwrap();
    let sessions = build_sessions(
        &test_config(db),
        ScriptedTokens::new(&["same"; 16]),
        Arc::new(PlainVerifier),
    );

    sessions.register(registration(1)).await.unwrap();
    let err = sessions.register(registration(2)).await.unwrap_err();
    assert!(matches!(err, SessionError::Store(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issues_yield_distinct_refresh_tokens() {
    const N: usize = 20;

    let db = Database::open(":memory:").await.unwrap();
    let sessions = build_sessions(
        &test_config(db),
        Arc::new(OpaqueTokenGenerator),
        Arc::new(PlainVerifier),
    );

    for i in 0..N {
        sessions.register(registration(i)).await.unwrap();
    }

    let logins = (0..N).map(|i| {
        let sessions = sessions.clone();
        async move {
            sessions
                .login(&format!("user{}@example.com", i), PASSWORD)
                .await
        }
    });
    let results = futures::future::join_all(logins).await;

    let tokens: HashSet<String> = results
        .into_iter()
        .map(|r| r.unwrap().tokens.refresh_token)
        .collect();
    assert_eq!(tokens.len(), N);
}

#[tokio::test]
async fn test_concurrent_refreshes_do_not_lose_updates() {
    let db = Database::open(":memory:").await.unwrap();
    let sessions = build_sessions(
        &test_config(db.clone()),
        Arc::new(OpaqueTokenGenerator),
        Arc::new(PlainVerifier),
    );

    let session = sessions.register(registration(1)).await.unwrap();
    let refresh = session.tokens.refresh_token.clone();

    let (a, b) = tokio::join!(sessions.refresh(&refresh), sessions.refresh(&refresh));

    // Either both succeed one after the other or the loser sees a conflict;
    // the refresh token never changes.
    for result in [&a, &b] {
        match result {
            Ok(s) => assert_eq!(s.tokens.refresh_token, refresh),
            Err(e) => assert!(matches!(e, SessionError::Conflict)),
        }
    }
    assert!(a.is_ok() || b.is_ok());

    let account = db
        .users()
        .get_by_refresh_token(&refresh)
        .await
        .unwrap()
        .unwrap();
    let stored = account.access_token.unwrap();
    let winners: Vec<_> = [a, b]
        .into_iter()
        .filter_map(Result::ok)
        .map(|s| s.tokens.access_token)
        .collect();
    assert!(winners.contains(&stored));
}
