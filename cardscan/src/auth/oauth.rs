//! Google OAuth 2.0 authorization-code flow used to obtain a delegated send-mail token.

use rand::prelude::RngExt;
use rand::rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::{config::GoogleOAuthConfig, errors::Error, types::DelegatedCredential};

/// Generate an unguessable value for the OAuth `state` parameter
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct GoogleOAuth {
    client_id: String,
    client_secret: String,
    authorize_url: Url,
    token_url: Url,
    userinfo_url: Url,
    scopes: Vec<String>,
    redirect_uri: Url,
    client: Client,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct UserInfo {
    email: Option<String>,
}

impl GoogleOAuth {
    pub fn new(
        client_id: String,
        client_secret: String,
        config: &GoogleOAuthConfig,
        redirect_uri: Url,
        timeout: Duration,
    ) -> Result<Self, Error> {
        Ok(Self {
            client_id,
            client_secret,
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            scopes: config.scopes.clone(),
            redirect_uri,
            client: crate::http::client(timeout).map_err(|e| Error::Other(anyhow::anyhow!("create OAuth client: {e}")))?,
        })
    }

    /// URL the browser is sent to for consent.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "online")
            .append_pair("include_granted_scopes", "true");
        url
    }

    /// Exchange the authorization code and look up the account the token belongs to.
    #[instrument(skip_all, err)]
    pub async fn sign_in(&self, code: &str) -> Result<DelegatedCredential, Error> {
        let access_token = self.exchange_code(code).await?;
        let email = self.fetch_email(&access_token).await?;
        debug!(%email, "OAuth sign-in completed");

        Ok(DelegatedCredential { access_token, email })
    }

    async fn exchange_code(&self, code: &str) -> Result<String, Error> {
        let body = serde_urlencoded::to_string(TokenRequest {
            grant_type: "authorization_code",
            code,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            redirect_uri: self.redirect_uri.as_str(),
        })
        .map_err(|e| Error::Other(anyhow::anyhow!("encode token request: {e}")))?;

        let response = self
            .client
            .post(self.token_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("OAuth token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %body, "OAuth code exchange rejected");
            return Err(Error::Unauthenticated {
                message: Some("Sign-in failed".to_string()),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("decode OAuth token response: {e}")))?;

        if let Some(scope) = &token.scope
            && !scope.split(' ').any(|s| s.ends_with("/gmail.send"))
        {
            tracing::warn!(%scope, "Granted scopes do not include gmail.send; sending will fail");
        }

        Ok(token.access_token)
    }

    async fn fetch_email(&self, access_token: &str) -> Result<String, Error> {
        let response = self
            .client
            .get(self.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("userinfo request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Unauthenticated {
                message: Some("Sign-in failed".to_string()),
            });
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("decode userinfo response: {e}")))?;

        info.email.ok_or_else(|| Error::Unauthenticated {
            message: Some("Google account has no email address".to_string()),
        })
    }
}
