//! Signed access tokens (HS256 JWT).
//!
//! Access tokens are stateless: the subject and role are carried in the
//! claims and validated purely against the signing key. Refresh tokens are
//! opaque and live in the database, see [`crate::token`].

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::UserRole;

/// Default access token lifetime: 5 minutes
pub const ACCESS_TOKEN_DURATION_SECS: i64 = 5 * 60;

/// Default refresh token lifetime: 2 weeks
pub const REFRESH_TOKEN_DURATION_SECS: i64 = 14 * 24 * 60 * 60;

/// JWT claims for access tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (account UUID)
    pub sub: String,
    /// Role in canonical `ROLE_<NAME>` form. Optional on the wire so that a
    /// structurally valid token without a role can be told apart from garbage.
    #[serde(rename = "role_user", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Encodes and decodes access tokens with a process-wide symmetric key.
#[derive(Clone)]
pub struct ClaimsCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for ClaimsCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsCodec").finish_non_exhaustive()
    }
}

impl ClaimsCodec {
    /// Create a codec from the signing secret. The secret is not retained.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Sign an access token for `account_id` valid from `issued_at` for `ttl_secs`.
    /// A negative `ttl_secs` yields a token that is already expired.
    pub fn encode(
        &self,
        account_id: &str,
        role: UserRole,
        issued_at: i64,
        ttl_secs: i64,
    ) -> Result<String, EncodeError> {
        let claims = AccessClaims {
            sub: account_id.to_string(),
            role: Some(role.as_claim().to_string()),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl_secs),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(EncodeError)
    }

    /// Verify signature and expiry, returning the embedded claims.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, DecodeError> {
        self.decode_at(token, unix_now())
    }

    /// Same as [`decode`](Self::decode) with an explicit notion of "now".
    pub fn decode_at(&self, token: &str, now: i64) -> Result<AccessClaims, DecodeError> {
        // Expiry is checked below with `now >= exp`; the library check is
        // strictly-after and would accept a token at its exact expiry second.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
                .map_err(DecodeError::from)?;

        if now >= token_data.claims.exp {
            return Err(DecodeError::Expired);
        }

        Ok(token_data.claims)
    }
}

/// Failure to sign a token.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode token: {0}")]
pub struct EncodeError(#[source] jsonwebtoken::errors::Error);

/// Why a presented access token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for DecodeError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                DecodeError::BadSignature
            }
            ErrorKind::ExpiredSignature => DecodeError::Expired,
            _ => DecodeError::Malformed,
        }
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
