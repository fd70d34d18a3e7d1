//! Outbound email sent on behalf of a signed-in user.
//!
//! Messages are composed with the lettre builder and delivered through the Gmail
//! `users.messages.send` API using the user's delegated access token, so they appear in the
//! user's own Sent folder.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use lettre::{
    Message,
    message::{Mailbox, header::ContentType},
};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::{config::EmailConfig, errors::Error, http::ensure_slash, types::DelegatedCredential};

/// An HTML email as requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Delivers composed mail using a delegated credential.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, credential: &DelegatedCredential, email: &OutgoingEmail) -> Result<(), Error>;
}

/// Build the RFC 5322 message. The sender is the account that granted the credential.
pub fn compose(from: &str, email: &OutgoingEmail) -> Result<Message, Error> {
    let from = from.parse::<Mailbox>().map_err(|e| Error::Email {
        operation: format!("parse sender address: {e}"),
    })?;

    let to = email.to.trim().parse::<Mailbox>().map_err(|e| Error::Validation {
        message: format!("Invalid recipient address '{}': {e}", email.to),
    })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(email.html_body.clone())
        .map_err(|e| Error::Email {
            operation: format!("build email message: {e}"),
        })
}

pub struct GmailSender {
    client: Client,
    base_url: Url,
}

#[derive(Serialize)]
struct SendRequest {
    raw: String,
}

impl GmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self, Error> {
        Ok(Self {
            client: build_client(config.timeout)?,
            base_url: config.gmail_base_url.clone(),
        })
    }

    fn send_url(&self) -> Result<Url, Error> {
        ensure_slash(&self.base_url)
            .join("gmail/v1/users/me/messages/send")
            .map_err(|e| Error::Email {
                operation: format!("build Gmail URL: {e}"),
            })
    }
}

fn build_client(timeout: Duration) -> Result<Client, Error> {
    crate::http::client(timeout).map_err(|e| Error::Email {
        operation: format!("create HTTP client: {e}"),
    })
}

#[async_trait]
impl MailSender for GmailSender {
    #[instrument(skip_all, fields(from = %credential.email), err)]
    async fn send(&self, credential: &DelegatedCredential, email: &OutgoingEmail) -> Result<(), Error> {
        let message = compose(&credential.email, email)?;
        let raw = general_purpose::URL_SAFE_NO_PAD.encode(message.formatted());

        let response = self
            .client
            .post(self.send_url()?)
            .bearer_auth(&credential.access_token)
            .json(&SendRequest { raw })
            .send()
            .await
            .map_err(|e| Error::Email {
                operation: format!("send email: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Email {
                operation: format!("send email: Gmail returned {status}: {body}"),
            });
        }

        debug!("Email accepted by Gmail");
        Ok(())
    }
}
