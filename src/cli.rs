//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::{Database, NewAccount, UserRole};
use crate::jwt::{ACCESS_TOKEN_DURATION_SECS, REFRESH_TOKEN_DURATION_SECS};
use crate::password::{Argon2Verifier, CredentialVerifier, PASSWORD_SPECIALS};
use clap::Parser;
use rand::Rng;
use rand::seq::SliceRandom;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Length of the generated bootstrap admin password.
const ADMIN_PASSWORD_LENGTH: usize = 20;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ridepool", about = "Ride-sharing account and session service")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "RIDEPOOL_PORT", default_value = "8080")]
    pub port: u16,

    /// Path to SQLite database file (":memory:" for a throwaway database)
    #[arg(short, long, env = "RIDEPOOL_DATABASE", default_value = "ridepool.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = ACCESS_TOKEN_DURATION_SECS, value_parser = clap::value_parser!(i64).range(1..))]
    pub access_token_ttl: i64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = REFRESH_TOKEN_DURATION_SECS, value_parser = clap::value_parser!(i64).range(1..))]
    pub refresh_token_ttl: i64,

    /// Upper bound on a single user store call, in milliseconds
    #[arg(long, default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Login/register requests per minute per client IP (0 disables)
    #[arg(long, default_value = "10")]
    pub login_rate_limit: u32,

    /// Create an admin account on startup (if none exists) and print its password
    #[arg(long)]
    pub create_admin: bool,

    /// Email of the bootstrap admin account
    #[arg(long, default_value = "admin@ridepool.local")]
    pub admin_email: String,

    /// Phone number of the bootstrap admin account
    #[arg(long, default_value = "+10000000000")]
    pub admin_phone: String,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // SAFETY: called during startup before any other thread is spawned,
        // and nothing else reads this variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Generate a random password that satisfies the registration policy.
pub fn generate_admin_password() -> String {
    const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const DIGITS: &[u8] = b"0123456789";
    let specials = PASSWORD_SPECIALS.as_bytes();

    let mut rng = rand::rng();
    let mut pick = |set: &[u8]| set[rng.random_range(0..set.len())];

    let mut chars = vec![pick(LOWER), pick(UPPER), pick(DIGITS), pick(specials)];
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, specials].concat();
    while chars.len() < ADMIN_PASSWORD_LENGTH {
        chars.push(pick(all.as_slice()));
    }
    chars.shuffle(&mut rand::rng());

    chars.into_iter().map(char::from).collect()
}

/// Handle the --create-admin flag: create an admin unless one already exists.
pub async fn handle_create_admin(db: &Database, email: &str, phone_number: &str) {
    match db.users().admin_exists().await {
        Ok(true) => {
            info!("Admin account already exists, skipping bootstrap");
        }
        Ok(false) => {
            let password = generate_admin_password();
            let password_hash = match Argon2Verifier::new().hash(&password) {
                Ok(hash) => hash,
                Err(e) => {
                    error!(error = %e, "Failed to hash admin password");
                    std::process::exit(1);
                }
            };

            let account = NewAccount {
                email: email.to_string(),
                username: "admin".to_string(),
                phone_number: phone_number.to_string(),
                password_hash,
                role: UserRole::Admin,
            };

            match db.users().create(&account).await {
                Ok(created) => {
                    println!();
                    println!("Admin account created: {}", created.email);
                    println!("Password: {}", password);
                    println!();
                }
                Err(e) => {
                    error!(error = %e, "Failed to create admin account");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing admin");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        access_token_ttl_secs: args.access_token_ttl,
        refresh_token_ttl_secs: args.refresh_token_ttl,
        store_timeout: Duration::from_millis(args.store_timeout_ms),
        login_rate_limit: NonZeroU32::new(args.login_rate_limit),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
