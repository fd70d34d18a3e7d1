//! Request extractor for the signed-in user's delegated credential.

use axum::{
    extract::OptionalFromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use std::convert::Infallible;
use tracing::{instrument, trace};

use crate::{AppState, auth::session, types::DelegatedCredential};

/// Value of the cookie called `name`, if present.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(cookie_name, _)| *cookie_name == name)
        .map(|(_, value)| value)
}

/// Resolves to `None` when the email workflow is disabled, when there is no session cookie, or
/// when the cookie is invalid or expired. Never rejects the request.
impl OptionalFromRequestParts<AppState> for DelegatedCredential {
    type Rejection = Infallible;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>, Self::Rejection> {
        if !state.email.is_enabled() {
            return Ok(None);
        }

        let Some(token) = read_cookie(&parts.headers, &state.config.auth.session.cookie_name) else {
            return Ok(None);
        };

        match session::verify_session_token(token, &state.session_keys) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                // Expected for expired sessions
                trace!("Ignoring invalid session cookie: {e}");
                Ok(None)
            }
        }
    }
}
