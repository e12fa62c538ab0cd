//! Token-based authentication for WebSocket and admin endpoints.
//!
//! Bearer tokens are HMAC-SHA256 signed JWTs carrying `{user_id, iat, exp}`.
//! Connections without a token are downgraded to a generated guest identity
//! rather than rejected, so the browser client can connect before obtaining a
//! token.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, info, warn};

use crate::errors::AuthError;

/// Default token lifetime (24 hours).
pub const TOKEN_TTL_SECS: u64 = 86_400;

/// Claims carried inside a signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    /// Issued-at, seconds since epoch
    pub iat: u64,
    /// Expiration, seconds since epoch
    pub exp: u64,
}

/// Signing and verification keys derived from the configured secret.
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AuthKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Create a token for a user with the default 24 h expiry.
    pub fn create_token(&self, user_id: &str) -> Result<String, AuthError> {
        self.create_token_with_ttl(user_id, TOKEN_TTL_SECS)
    }

    pub fn create_token_with_ttl(&self, user_id: &str, ttl_secs: u64) -> Result<String, AuthError> {
        let now = epoch_secs();
        let claims = TokenClaims {
            user_id: user_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::TokenCreation(e.to_string()))?;
        debug!(user_id, "token created");
        Ok(token)
    }

    /// Validate a token, returning its claims if valid and unexpired.
    pub fn validate_token(&self, token: &str) -> Option<TokenClaims> {
        let validation = Validation::new(Algorithm::HS256);

        match jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                warn!("token validation failed: {e}");
                None
            }
        }
    }

    /// Create a guest token with an auto-generated user ID.
    pub fn create_guest_token(&self) -> Result<(String, String), AuthError> {
        let user_id = guest_user_id();
        let token = self.create_token(&user_id)?;
        Ok((token, user_id))
    }

    /// Authenticate a WebSocket connection.
    ///
    /// A missing token yields a generated guest identity; an invalid or
    /// expired token yields `None` and the caller decides whether to close
    /// the connection or downgrade.
    pub fn authenticate(&self, token: Option<&str>) -> Option<String> {
        match token {
            None => {
                let user_id = guest_user_id();
                info!(user_id, "guest user created");
                Some(user_id)
            }
            Some(t) => self.validate_token(t).map(|claims| {
                info!(user_id = %claims.user_id, "user authenticated");
                claims.user_id
            }),
        }
    }
}

/// Generate a guest user ID of the form `guest_<8 hex>`.
pub fn guest_user_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("guest_{}", &id[..8])
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let keys = AuthKeys::new("test-secret");
        let token = keys.create_token("user-42").unwrap();
        let claims = keys.validate_token(&token).expect("token should validate");
        assert_eq!(claims.user_id, "user-42");
        assert!(claims.exp > claims.iat);
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = AuthKeys::new("test-secret");
        // Issue a token that expired an hour ago by signing claims manually.
        let now = epoch_secs();
        let claims = TokenClaims {
            user_id: "user-42".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(keys.validate_token(&token).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let keys = AuthKeys::new("secret-a");
        let other = AuthKeys::new("secret-b");
        let token = keys.create_token("user-42").unwrap();
        assert!(other.validate_token(&token).is_none());
    }

    #[test]
    fn test_guest_identity_shape() {
        let id = guest_user_id();
        assert!(id.starts_with("guest_"));
        assert_eq!(id.len(), "guest_".len() + 8);
    }

    #[test]
    fn test_authenticate_missing_token_creates_guest() {
        let keys = AuthKeys::new("test-secret");
        let user = keys.authenticate(None).unwrap();
        assert!(user.starts_with("guest_"));
    }

    #[test]
    fn test_authenticate_invalid_token_returns_none() {
        let keys = AuthKeys::new("test-secret");
        assert!(keys.authenticate(Some("not-a-token")).is_none());
    }
}
