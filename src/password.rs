//! Password hashing and the registration password policy.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Special characters accepted (and one of which is required) by the password policy.
pub const PASSWORD_SPECIALS: &str = "@$!%*?&";

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hashes and checks account passwords.
///
/// Both operations are CPU-bound; callers on the async runtime should run them
/// through `spawn_blocking`.
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, raw: &str) -> Result<String, CredentialError>;
    fn matches(&self, raw: &str, hash: &str) -> bool;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to hash password: {0}")]
pub struct CredentialError(String);

/// Argon2id with the crate's default parameters. Hashes are PHC strings.
#[derive(Default)]
pub struct Argon2Verifier {
    argon2: Argon2<'static>,
}

impl Argon2Verifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialVerifier for Argon2Verifier {
    fn hash(&self, raw: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(raw.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError(e.to_string()))
    }

    fn matches(&self, raw: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2
            .verify_password(raw.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Check a candidate password against the registration policy: at least
/// eight characters from letters, digits and `@$!%*?&`, with at least one
/// lowercase, uppercase, digit and special character.
pub fn check_password_strength(password: &str) -> bool {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return false;
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c);
    if !password.chars().all(allowed) {
        return false;
    }

    password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c))
}
