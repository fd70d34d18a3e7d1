//! Authentication for the email workflow.
//!
//! Scanning cards needs no sign-in. Sending email does: the user signs in with Google
//! ([`oauth`]), granting the `gmail.send` scope, and the resulting access token is kept in a
//! signed session cookie ([`session`]). Handlers receive it as a typed
//! `Option<DelegatedCredential>` ([`current_credential`]).
//!
//! Whether the workflow is available at all is decided once at startup by
//! [`EmailFeature::from_config`]: without an OAuth client id and secret it is
//! [`EmailFeature::Disabled`] and every send request is unauthorized.

pub mod current_credential;
pub mod oauth;
pub mod session;

use std::sync::Arc;

use crate::{
    config::Config,
    email::{GmailSender, MailSender},
    errors::Error,
};
use oauth::GoogleOAuth;

/// Collaborators of an enabled email workflow.
pub struct EmailProviders {
    pub oauth: GoogleOAuth,
    pub mailer: Arc<dyn MailSender>,
}

#[derive(Clone)]
pub enum EmailFeature {
    Enabled(Arc<EmailProviders>),
    Disabled,
}

impl EmailFeature {
    /// Evaluate the OAuth configuration. Missing client credentials disable the feature.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let google = &config.auth.google;
        let (Some(client_id), Some(client_secret)) = (google.client_id.clone(), google.client_secret.clone()) else {
            tracing::info!("Google OAuth not configured; email sending is disabled");
            return Ok(EmailFeature::Disabled);
        };

        let redirect_uri = config
            .oauth_redirect_uri()
            .map_err(|e| Error::Configuration {
                message: format!("Invalid public_url for OAuth redirect: {e}"),
            })?;

        let oauth = GoogleOAuth::new(client_id, client_secret, google, redirect_uri, config.email.timeout)?;
        let mailer = Arc::new(GmailSender::new(&config.email)?);

        tracing::info!("Google OAuth configured; email sending is enabled");
        Ok(Self::enabled(oauth, mailer))
    }

    pub fn enabled(oauth: GoogleOAuth, mailer: Arc<dyn MailSender>) -> Self {
        EmailFeature::Enabled(Arc::new(EmailProviders { oauth, mailer }))
    }

    pub fn providers(&self) -> Option<&EmailProviders> {
        match self {
            EmailFeature::Enabled(providers) => Some(providers),
            EmailFeature::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, EmailFeature::Enabled(_))
    }
}
