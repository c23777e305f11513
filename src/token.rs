//! Opaque refresh token generation.
//!
//! Refresh tokens carry no claims. They are 256 random bits from the OS-seeded
//! thread RNG, hex encoded, and only mean something after a database lookup.

use rand::RngCore;

/// Number of random bytes in a refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Length of the rendered refresh token string.
pub const REFRESH_TOKEN_LEN: usize = REFRESH_TOKEN_BYTES * 2;

/// Source of refresh token candidates.
pub trait TokenSource: Send + Sync {
    fn generate(&self) -> String;
}

/// Cryptographically secure generator used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueTokenGenerator;

impl TokenSource for OpaqueTokenGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
