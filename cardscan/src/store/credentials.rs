//! Service account authentication for the spreadsheet API.
//!
//! Implements the OAuth 2.0 JWT bearer grant: a short-lived RS256 assertion signed with the
//! service account's private key is exchanged at the key's `token_uri` for an access token. The
//! token is cached and reused until shortly before it expires.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, instrument};

use super::StoreError;

/// Scope granting read/write access to spreadsheets
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion; the token endpoint caps it at one hour
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh the cached token this long before it actually expires
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Source of bearer tokens for spreadsheet API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, StoreError>;
}

/// The fields of a downloaded service account key file that token exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse the key from inline JSON when given, otherwise from the file at `path`.
    pub fn load(inline_json: Option<&str>, path: &Path) -> Result<Self, StoreError> {
        match inline_json.map(str::trim).filter(|json| !json.is_empty()) {
            Some(json) => Self::from_json(json),
            None => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    StoreError::Credentials(format!(
                        "no inline service account key configured and {} could not be read: {e}",
                        path.display()
                    ))
                })?;
                Self::from_json(&contents)
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let mut key: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Credentials(format!("invalid service account key: {e}")))?;

        // Keys pasted into environment variables often keep their newlines escaped
        if !key.private_key.contains('\n') {
            key.private_key = key.private_key.replace("\\n", "\n");
        }

        Ok(key)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    assertion: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Exchanges signed assertions for access tokens and caches the result.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    scope: String,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self, StoreError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StoreError::Credentials(format!("invalid service account private key: {e}")))?;

        Ok(Self {
            key,
            signing_key,
            scope: SPREADSHEETS_SCOPE.to_string(),
            client: crate::http::client(timeout)?,
            cached: Mutex::new(None),
        })
    }

    fn sign_assertion(&self) -> Result<String, StoreError> {
        let iat = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| StoreError::Credentials(format!("failed to sign token assertion: {e}")))
    }

    #[instrument(skip(self), fields(client_email = %self.key.client_email), err)]
    async fn fetch_token(&self) -> Result<CachedToken, StoreError> {
        let assertion = self.sign_assertion()?;
        let body = serde_urlencoded::to_string(TokenRequest {
            grant_type: JWT_BEARER_GRANT,
            assertion: &assertion,
        })
        .map_err(|e| StoreError::Credentials(e.to_string()))?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Credentials(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("token response: {e}")))?;

        debug!(expires_in = token.expires_in, "Obtained spreadsheet access token");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        Ok(CachedToken {
            token: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.token.clone());
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose};
    use std::io::Write;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pem");

    fn key_json(token_uri: &str) -> String {
        serde_json::json!({
            "type": "service_account",
            "project_id": "cards",
            "client_email": "scanner@cards.iam.gserviceaccount.com",
            "private_key": TEST_PRIVATE_KEY,
            "token_uri": token_uri,
        })
        .to_string()
    }

    fn claims_of(assertion: &str) -> AssertionClaims {
        let payload = assertion.split('.').nth(1).unwrap();
        let bytes = general_purpose::URL_SAFE_NO_PAD.decode(payload).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_inline_json_preferred_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", key_json("https://file.example/token")).unwrap();

        let key = ServiceAccountKey::load(Some(&key_json("https://inline.example/token")), file.path()).unwrap();
        assert_eq!(key.token_uri, "https://inline.example/token");
    }

    #[test]
    fn test_file_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", key_json("https://file.example/token")).unwrap();

        let key = ServiceAccountKey::load(None, file.path()).unwrap();
        assert_eq!(key.client_email, "scanner@cards.iam.gserviceaccount.com");
        assert_eq!(key.token_uri, "https://file.example/token");
    }

    #[test]
    fn test_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServiceAccountKey::load(None, &dir.path().join("credentials.json")).unwrap_err();
        assert!(matches!(err, StoreError::Credentials(ref m) if m.contains("credentials.json")));
    }

    #[test]
    fn test_invalid_inline_json() {
        let err = ServiceAccountKey::load(Some("{not json"), Path::new("unused.json")).unwrap_err();
        assert!(matches!(err, StoreError::Credentials(_)));
    }

    #[test]
    fn test_escaped_newlines_are_restored() {
        let escaped = TEST_PRIVATE_KEY.replace('\n', "\\n");
        let json = serde_json::json!({ "client_email": "a@b.c", "private_key": escaped }).to_string();

        let key = ServiceAccountKey::from_json(&json).unwrap();
        assert_eq!(key.private_key, TEST_PRIVATE_KEY);
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
        assert!(ServiceAccountAuth::new(key, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let json = serde_json::json!({ "client_email": "a@b.c", "private_key": "not a key" }).to_string();
        let key = ServiceAccountKey::from_json(&json).unwrap();

        assert!(matches!(
            ServiceAccountAuth::new(key, Duration::from_secs(5)),
            Err(StoreError::Credentials(_))
        ));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let key = ServiceAccountKey::from_json(&key_json("https://example/token")).unwrap();
        assert!(!format!("{key:?}").contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_token_exchange_and_cache() {
        let server = MockServer::start().await;
        let token_uri = format!("{}/token", server.uri());

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .and(body_string_contains("assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.service",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = ServiceAccountKey::from_json(&key_json(&token_uri)).unwrap();
        let auth = ServiceAccountAuth::new(key, Duration::from_secs(5)).unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "ya29.service");
        // Served from cache; the mock expects exactly one exchange
        assert_eq!(auth.access_token().await.unwrap(), "ya29.service");
    }

    #[test]
    fn test_assertion_claims() {
        let key = ServiceAccountKey::from_json(&key_json("https://oauth2.example/token")).unwrap();
        let auth = ServiceAccountAuth::new(key, Duration::from_secs(5)).unwrap();

        let claims = claims_of(&auth.sign_assertion().unwrap());

        assert_eq!(claims.iss, "scanner@cards.iam.gserviceaccount.com");
        assert_eq!(claims.scope, SPREADSHEETS_SCOPE);
        assert_eq!(claims.aud, "https://oauth2.example/token");
        assert_eq!(claims.exp - claims.iat, ASSERTION_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn test_token_endpoint_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let key = ServiceAccountKey::from_json(&key_json(&format!("{}/token", server.uri()))).unwrap();
        let auth = ServiceAccountAuth::new(key, Duration::from_secs(5)).unwrap();

        let err = auth.access_token().await.unwrap_err();
        assert!(matches!(err, StoreError::Credentials(ref m) if m.contains("invalid_grant")));
    }
}
