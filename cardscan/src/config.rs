//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `CARDSCAN_CONFIG`
//! environment variable. A missing file is not an error; every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Deployment variables** - The unprefixed names used by existing deployments:
//!    `GEMINI_API_KEY`, `GOOGLE_SHEET_ID`, `GOOGLE_SHEET_NAME`, `GOOGLE_CLIENT_ID`,
//!    `GOOGLE_CLIENT_SECRET` and `NEXTAUTH_SECRET`. `GOOGLE_SERVICE_ACCOUNT_JSON` is read verbatim
//!    after extraction.
//! 3. **Environment variables** - Variables prefixed with `CARDSCAN_` override everything else
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `CARDSCAN_STORE__SHEET_NAME=Leads` sets the `store.sheet_name` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use cardscan::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `public_url`
//! - **Inference**: `inference.api_key`, `inference.model`, `inference.timeout`
//! - **Store**: `store.spreadsheet_id`, `store.sheet_name`, `store.service_account_json`,
//!   `store.credentials_path`
//! - **Authentication**: `auth.google.*` (OAuth client for the email workflow), `auth.session.*`
//! - **Email**: `email.gmail_base_url`, `email.timeout`
//! - **Limits**: `limits.max_upload_bytes`
//! - **Features**: `enable_metrics`, `enable_otel_export`

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CARDSCAN_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Externally reachable base URL, used to build the OAuth redirect URI
    pub public_url: Url,
    /// Multimodal model settings
    pub inference: InferenceConfig,
    /// Spreadsheet the extracted records are appended to
    pub store: StoreConfig,
    /// OAuth client and session cookie settings for the email workflow
    pub auth: AuthConfig,
    /// Outbound email settings
    pub email: EmailConfig,
    /// Request limits
    pub limits: LimitsConfig,
    /// CORS configuration for browser clients on other origins
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Multimodal inference service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// API key for the Gemini API. Uploads fail with a configuration error when unset.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model used for extraction
    pub model: String,
    /// Base URL of the Generative Language API
    pub base_url: Url,
    /// Upper bound on a single extraction call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Tabular store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Target spreadsheet identifier
    pub spreadsheet_id: Option<String>,
    /// Sheet (tab) name the records are appended to
    pub sheet_name: String,
    /// Service account key as inline JSON (preferred)
    #[serde(skip_serializing)]
    pub service_account_json: Option<String>,
    /// Service account key file, only read when no inline JSON is configured
    pub credentials_path: PathBuf,
    /// Base URL of the Sheets API
    pub base_url: Url,
    /// Upper bound on each individual store call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Google OAuth client used to obtain delegated send-mail tokens
    pub google: GoogleOAuthConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
}

/// Google OAuth client configuration. The email workflow is disabled unless both the client id
/// and secret are set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoogleOAuthConfig {
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    /// Authorization endpoint the browser is redirected to
    pub authorize_url: Url,
    /// Token endpoint used to exchange the authorization code
    pub token_url: Url,
    /// Endpoint returning the signed-in user's profile
    pub userinfo_url: Url,
    /// Scopes requested at sign-in
    pub scopes: Vec<String>,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Secret used to sign session cookies. A random per-process secret is used when unset.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// Session lifetime
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name for session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

/// Outbound email configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    /// Base URL of the Gmail API
    pub gmail_base_url: Url,
    /// Upper bound on a single send call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest accepted card image in bytes
    pub max_upload_bytes: u64,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
///
/// The bundled page is served from the same origin, so no origins are allowed by default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// A configured CORS origin.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: Url::parse("http://localhost:3000").expect("static URL is valid"),
            inference: InferenceConfig::default(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            base_url: Url::parse("https://generativelanguage.googleapis.com/").expect("static URL is valid"),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            sheet_name: "Sheet1".to_string(),
            service_account_json: None,
            credentials_path: PathBuf::from("credentials.json"),
            base_url: Url::parse("https://sheets.googleapis.com/").expect("static URL is valid"),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for GoogleOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            authorize_url: Url::parse("https://accounts.google.com/o/oauth2/v2/auth").expect("static URL is valid"),
            token_url: Url::parse("https://oauth2.googleapis.com/token").expect("static URL is valid"),
            userinfo_url: Url::parse("https://openidconnect.googleapis.com/v1/userinfo").expect("static URL is valid"),
            scopes: vec![
                "openid".to_string(),
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
                "https://www.googleapis.com/auth/userinfo.profile".to_string(),
                "https://www.googleapis.com/auth/gmail.send".to_string(),
            ],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            timeout: Duration::from_secs(60 * 60), // matches Google access token lifetime
            cookie_name: "cardscan_session".to_string(),
            cookie_secure: false,
            cookie_same_site: "lax".to_string(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            gmail_base_url: Url::parse("https://gmail.googleapis.com/").expect("static URL is valid"),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // Inline JSON would be parsed as a structured value by the env provider, so the key is
        // read verbatim here. The prefixed variable still wins when both are set.
        if let Ok(json) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON")
            && std::env::var("CARDSCAN_STORE__SERVICE_ACCOUNT_JSON").is_err()
        {
            config.store.service_account_json = Some(json);
        }

        config.clear_blank_values();
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// An empty variable such as `GOOGLE_CLIENT_ID=` means "not configured".
    fn clear_blank_values(&mut self) {
        for value in [
            &mut self.inference.api_key,
            &mut self.store.spreadsheet_id,
            &mut self.store.service_account_json,
            &mut self.auth.google.client_id,
            &mut self.auth.google.client_secret,
            &mut self.auth.session.secret,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            }
        }
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Variable names carried over from existing deployments
            .merge(Env::raw().only(&["GEMINI_API_KEY"]).map(|_| "inference.api_key".into()))
            .merge(Env::raw().only(&["GOOGLE_SHEET_ID"]).map(|_| "store.spreadsheet_id".into()))
            .merge(Env::raw().only(&["GOOGLE_SHEET_NAME"]).map(|_| "store.sheet_name".into()))
            .merge(Env::raw().only(&["GOOGLE_CLIENT_ID"]).map(|_| "auth.google.client_id".into()))
            .merge(
                Env::raw()
                    .only(&["GOOGLE_CLIENT_SECRET"])
                    .map(|_| "auth.google.client_secret".into()),
            )
            .merge(Env::raw().only(&["NEXTAUTH_SECRET"]).map(|_| "auth.session.secret".into()))
            // Prefixed environment variables override everything else
            .merge(Env::prefixed("CARDSCAN_").ignore(&["config"]).split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.limits.max_upload_bytes == 0 {
            return Err(Error::Configuration {
                message: "Config validation: limits.max_upload_bytes must be greater than 0".to_string(),
            });
        }

        if self.store.sheet_name.trim().is_empty() {
            return Err(Error::Configuration {
                message: "Config validation: store.sheet_name cannot be empty".to_string(),
            });
        }

        if self.inference.timeout.is_zero() || self.store.timeout.is_zero() || self.email.timeout.is_zero() {
            return Err(Error::Configuration {
                message: "Config validation: inference, store and email timeouts must be non-zero".to_string(),
            });
        }

        // A half-configured OAuth client is almost always a deployment mistake
        let google = &self.auth.google;
        if google.client_id.is_some() != google.client_secret.is_some() {
            return Err(Error::Configuration {
                message: "Config validation: auth.google.client_id and auth.google.client_secret must be set together \
                          (GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET)"
                    .to_string(),
            });
        }

        if !matches!(self.auth.session.cookie_same_site.to_lowercase().as_str(), "strict" | "lax" | "none") {
            return Err(Error::Configuration {
                message: format!(
                    "Config validation: auth.session.cookie_same_site must be one of strict, lax or none (got '{}')",
                    self.auth.session.cookie_same_site
                ),
            });
        }

        // Validate that wildcard is not used with credentials
        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::Configuration {
                message: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Redirect URI registered with the OAuth client
    pub fn oauth_redirect_uri(&self) -> Result<Url, url::ParseError> {
        self.public_url.join("auth/google/callback")
    }
}
