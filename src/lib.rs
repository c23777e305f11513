pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod token;

use api::create_api_router;
use auth::SessionValidator;
use axum::Router;
use db::Database;
use jwt::ClaimsCodec;
use password::{Argon2Verifier, CredentialVerifier};
use rate_limit::RateLimitConfig;
use session::{SessionIssuer, SessionLifecycleService};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use token::{OpaqueTokenGenerator, TokenSource};
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing access tokens
    pub jwt_secret: Vec<u8>,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    /// Upper bound on a single user store call
    pub store_timeout: Duration,
    /// Login/register requests per minute per client IP; `None` disables limiting
    pub login_rate_limit: Option<NonZeroU32>,
}

/// Build the session service from the configuration with the given token
/// source and credential verifier.
pub fn build_sessions(
    config: &ServerConfig,
    tokens: Arc<dyn TokenSource>,
    verifier: Arc<dyn CredentialVerifier>,
) -> SessionLifecycleService {
    let codec = Arc::new(ClaimsCodec::new(&config.jwt_secret));
    let issuer = SessionIssuer::new(
        codec.clone(),
        tokens,
        config.access_token_ttl_secs,
        config.refresh_token_ttl_secs,
    );

    SessionLifecycleService::new(
        config.db.clone(),
        issuer,
        SessionValidator::new(codec),
        verifier,
        config.store_timeout,
    )
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    create_app_with(
        config,
        Arc::new(OpaqueTokenGenerator),
        Arc::new(Argon2Verifier::new()),
    )
}

/// Like [`create_app`], with the token source and credential verifier supplied by the caller.
pub fn create_app_with(
    config: &ServerConfig,
    tokens: Arc<dyn TokenSource>,
    verifier: Arc<dyn CredentialVerifier>,
) -> Router {
    let sessions = build_sessions(config, tokens, verifier);
    let validator = sessions.validator().clone();
    let rate_limit = config
        .login_rate_limit
        .map(|per_minute| Arc::new(RateLimitConfig::per_minute(per_minute)));

    Router::new().nest(
        "/api/v1",
        create_api_router(sessions, validator, rate_limit),
    )
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config.db).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
