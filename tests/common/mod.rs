#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, StatusCode, header},
};
use ridepool::{
    ServerConfig, create_app_with,
    db::{Database, NewAccount, UserRole},
    jwt::{ACCESS_TOKEN_DURATION_SECS, REFRESH_TOKEN_DURATION_SECS},
    password::{CredentialError, CredentialVerifier},
    token::{OpaqueTokenGenerator, TokenSource},
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const PASSWORD: &str = "Secret@123";

/// Stores passwords as-is so tests don't pay for argon2.
pub struct PlainVerifier;

impl CredentialVerifier for PlainVerifier {
    fn hash(&self, raw: &str) -> Result<String, CredentialError> {
        Ok(format!("plain:{}", raw))
    }

    fn matches(&self, raw: &str, hash: &str) -> bool {
        hash.strip_prefix("plain:") == Some(raw)
    }
}

/// Hands out scripted refresh tokens first, then random ones.
#[derive(Default)]
pub struct ScriptedTokens(Mutex<VecDeque<String>>);

impl ScriptedTokens {
    pub fn new(tokens: &[&str]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            tokens.iter().map(|t| t.to_string()).collect(),
        )))
    }
}

impl TokenSource for ScriptedTokens {
    fn generate(&self) -> String {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| OpaqueTokenGenerator.generate())
    }
}

pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: JWT_SECRET.to_vec(),
        access_token_ttl_secs: ACCESS_TOKEN_DURATION_SECS,
        refresh_token_ttl_secs: REFRESH_TOKEN_DURATION_SECS,
        store_timeout: Duration::from_secs(5),
        login_rate_limit: None,
    }
}

/// Create a test app without rate limiting.
pub async fn create_test_app() -> (Router, Database) {
    create_test_app_with_tokens(Arc::new(OpaqueTokenGenerator)).await
}

pub async fn create_test_app_with_tokens(tokens: Arc<dyn TokenSource>) -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app_with(&test_config(db.clone()), tokens, Arc::new(PlainVerifier));
    (app, db)
}

pub async fn create_rate_limited_app(per_minute: u32) -> Router {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let mut config = test_config(db);
    config.login_rate_limit = NonZeroU32::new(per_minute);
    create_app_with(
        &config,
        Arc::new(OpaqueTokenGenerator),
        Arc::new(PlainVerifier),
    )
}

/// Send a request and return the status and JSON body (`Value::Null` when empty).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let authorization =
        bearer.map(|token| HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());
    send_with_authorization(app, method, uri, authorization, body).await
}

/// Like [`send`], with the `Authorization` header value given verbatim.
pub async fn send_with_authorization(
    app: &Router,
    method: &str,
    uri: &str,
    authorization: Option<HeaderValue>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub fn registration(name: &str, phone: &str) -> Value {
    json!({
        "username": name,
        "email": format!("{}@example.com", name),
        "password": PASSWORD,
        "phone_number": phone,
    })
}

/// Register through the API and return the session body.
pub async fn register(app: &Router, name: &str, phone: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/auth/register",
        None,
        Some(registration(name, phone)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    body
}

pub async fn login(app: &Router, email: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await
}

/// Insert an admin directly and log it in, returning its access token.
pub async fn admin_token(app: &Router, db: &Database) -> String {
    db.users()
        .create(&NewAccount {
            email: "root@example.com".into(),
            username: "root".into(),
            phone_number: "+10000000000".into(),
            password_hash: format!("plain:{}", PASSWORD),
            role: UserRole::Admin,
        })
        .await
        .unwrap();

    let (status, body) = login(app, "root@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().unwrap().to_string()
}

pub fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing {} in {}", field, body))
}
