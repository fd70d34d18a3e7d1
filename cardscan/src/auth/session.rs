//! JWT session token creation and verification.
//!
//! The session cookie carries the signed-in user's address and the delegated access token
//! obtained at sign-in. It is signed (HS256) with the session secret and marked `HttpOnly`.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::prelude::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{config::SessionConfig, errors::Error, types::DelegatedCredential};

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,          // Subject (user email)
    pub access_token: String, // Delegated OAuth access token
    pub exp: i64,             // Expiration time
    pub iat: i64,             // Issued at
}

impl SessionClaims {
    pub fn new(credential: &DelegatedCredential, config: &SessionConfig) -> Self {
        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(config.timeout).unwrap_or(chrono::Duration::hours(1));

        Self {
            sub: credential.email.clone(),
            access_token: credential.access_token.clone(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
        }
    }
}

impl From<SessionClaims> for DelegatedCredential {
    fn from(claims: SessionClaims) -> Self {
        Self {
            access_token: claims.access_token,
            email: claims.sub,
        }
    }
}

/// Signing keys derived from the session secret.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
}

impl SessionKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret)),
            decoding: Arc::new(DecodingKey::from_secret(secret)),
        }
    }

    /// Keys from the configured secret, or from a random per-process secret when none is set.
    ///
    /// With a random secret, sessions do not survive a restart and are not shared between
    /// replicas.
    pub fn from_config(config: &SessionConfig) -> Self {
        match config.secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => Self::from_secret(secret.as_bytes()),
            None => {
                tracing::warn!("No session secret configured (NEXTAUTH_SECRET); using a random per-process secret");
                let mut secret = [0u8; 32];
                rng().fill(&mut secret);
                Self::from_secret(&secret)
            }
        }
    }
}

/// Create a JWT token for a user session
pub fn create_session_token(credential: &DelegatedCredential, keys: &SessionKeys, config: &SessionConfig) -> Result<String, Error> {
    let claims = SessionClaims::new(credential, config);

    encode(&Header::default(), &claims, &keys.encoding).map_err(|e| Error::Other(anyhow::anyhow!("create JWT: {e}")))
}

/// Verify and decode a JWT session token
pub fn verify_session_token(token: &str, keys: &SessionKeys) -> Result<DelegatedCredential, Error> {
    let validation = Validation::default();

    let token_data = decode::<SessionClaims>(token, &keys.decoding, &validation).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, invalid claims, expired tokens
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::ExpiredSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Error::Unauthenticated { message: None },

        _ => Error::Other(anyhow::anyhow!("JWT verification: {e}")),
    })?;

    Ok(DelegatedCredential::from(token_data.claims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn credential() -> DelegatedCredential {
        DelegatedCredential {
            access_token: "ya29.user".to_string(),
            email: "jane@example.com".to_string(),
        }
    }

    #[test]
    fn test_create_and_verify_session_token() {
        let keys = SessionKeys::from_secret(b"test-secret");
        let config = SessionConfig::default();

        let token = create_session_token(&credential(), &keys, &config).unwrap();
        assert!(!token.is_empty());

        let verified = verify_session_token(&token, &keys).unwrap();
        assert_eq!(verified, credential());
    }

    #[test]
    fn test_verify_invalid_token() {
        let keys = SessionKeys::from_secret(b"test-secret");

        let result = verify_session_token("invalid.token.here", &keys);
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_verify_token_wrong_secret() {
        let config = SessionConfig::default();
        let token = create_session_token(&credential(), &SessionKeys::from_secret(b"one"), &config).unwrap();

        let result = verify_session_token(&token, &SessionKeys::from_secret(b"two"));
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_verify_expired_token() {
        let keys = SessionKeys::from_secret(b"test-secret");
        let now = Utc::now();
        let claims = SessionClaims {
            sub: "jane@example.com".to_string(),
            access_token: "ya29.user".to_string(),
            exp: (now - chrono::Duration::hours(1)).timestamp(),
            iat: (now - chrono::Duration::hours(2)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).unwrap();

        let result = verify_session_token(&token, &keys);
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_session_lifetime_follows_config() {
        let config = SessionConfig {
            timeout: Duration::from_secs(600),
            ..Default::default()
        };

        let claims = SessionClaims::new(&credential(), &config);
        assert_eq!(claims.exp - claims.iat, 600);
    }

    #[test]
    fn test_random_secret_keys_differ() {
        let config = SessionConfig::default();
        let a = SessionKeys::from_config(&config);
        let b = SessionKeys::from_config(&config);

        let token = create_session_token(&credential(), &a, &config).unwrap();
        assert!(verify_session_token(&token, &a).is_ok());
        assert!(verify_session_token(&token, &b).is_err());
    }
}
