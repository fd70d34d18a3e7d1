use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};

use crate::{
    AppState,
    api::models::auth::{OAuthCallbackQuery, SessionResponse},
    auth::{EmailProviders, current_credential::read_cookie, oauth, session},
    config::SessionConfig,
    errors::{Error, ErrorResponse},
    types::DelegatedCredential,
};

/// Cookie holding the OAuth `state` between the login redirect and the callback
pub const STATE_COOKIE: &str = "cardscan_oauth_state";
const STATE_COOKIE_MAX_AGE_SECS: u64 = 600;

fn providers(state: &AppState) -> Result<&EmailProviders, Error> {
    state.email.providers().ok_or_else(|| Error::Unauthenticated {
        message: Some("Google sign-in is not configured".to_string()),
    })
}

fn cookie_attributes(config: &SessionConfig, max_age: u64) -> String {
    let secure = if config.cookie_secure { "; Secure" } else { "" };
    format!("Path=/; HttpOnly; SameSite={}; Max-Age={max_age}{secure}", config.cookie_same_site)
}

/// Helper function to create a session cookie
fn create_session_cookie(token: &str, config: &SessionConfig) -> String {
    format!("{}={}; {}", config.cookie_name, token, cookie_attributes(config, config.timeout.as_secs()))
}

fn clear_cookie(name: &str, config: &SessionConfig) -> String {
    format!("{name}=; {}", cookie_attributes(config, 0))
}

/// The CSRF state cookie only travels to `/auth`. Lax so it survives the top-level redirect
/// back from Google.
fn state_cookie(value: &str, max_age: u64, config: &SessionConfig) -> String {
    let secure = if config.cookie_secure { "; Secure" } else { "" };
    format!("{STATE_COOKIE}={value}; Path=/auth; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}")
}

/// Start Google sign-in
#[utoipa::path(
    get,
    path = "/auth/google/login",
    tag = "authentication",
    responses(
        (status = 303, description = "Redirect to Google's consent screen"),
        (status = 401, description = "Google sign-in is not configured", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>) -> Result<Response, Error> {
    let providers = providers(&state)?;
    let csrf_state = oauth::generate_state();

    let cookie = state_cookie(&csrf_state, STATE_COOKIE_MAX_AGE_SECS, &state.config.auth.session);

    let target = providers.oauth.authorization_url(&csrf_state);
    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to(target.as_str())).into_response())
}

/// Google sign-in redirect target
#[utoipa::path(
    get,
    path = "/auth/google/callback",
    tag = "authentication",
    params(OAuthCallbackQuery),
    responses(
        (status = 303, description = "Signed in; redirect to the application with a session cookie"),
        (status = 401, description = "Consent declined, state mismatch, or the code was rejected", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Response, Error> {
    let providers = providers(&state)?;

    if let Some(error) = query.error {
        tracing::info!(%error, "Google sign-in was not completed");
        return Err(Error::Unauthenticated {
            message: Some(format!("Sign-in was not completed: {error}")),
        });
    }

    let expected = read_cookie(&headers, STATE_COOKIE);
    let (Some(code), Some(returned)) = (query.code, query.state) else {
        return Err(Error::Unauthenticated {
            message: Some("Missing authorization code".to_string()),
        });
    };
    if expected != Some(returned.as_str()) {
        tracing::warn!("OAuth state mismatch");
        return Err(Error::Unauthenticated {
            message: Some("Sign-in state mismatch, please try again".to_string()),
        });
    }

    let credential = providers.oauth.sign_in(&code).await?;
    let session_config = &state.config.auth.session;
    let token = session::create_session_token(&credential, &state.session_keys, session_config)?;
    tracing::info!(email = %credential.email, "Signed in");

    Ok((
        AppendHeaders([
            (header::SET_COOKIE, create_session_cookie(&token, session_config)),
            (header::SET_COOKIE, state_cookie("", 0, session_config)),
        ]),
        Redirect::to("/"),
    )
        .into_response())
}

/// Sign out (clear session)
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Signed out", body = SessionResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let session_config = &state.config.auth.session;
    (
        AppendHeaders([(header::SET_COOKIE, clear_cookie(&session_config.cookie_name, session_config))]),
        Json(SessionResponse {
            email_enabled: state.email.is_enabled(),
            authenticated: false,
            email: None,
        }),
    )
}

/// Current sign-in state
#[utoipa::path(
    get,
    path = "/auth/session",
    tag = "authentication",
    responses(
        (status = 200, description = "Sign-in state of this browser", body = SessionResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_session(State(state): State<AppState>, credential: Option<DelegatedCredential>) -> Json<SessionResponse> {
    Json(SessionResponse {
        email_enabled: state.email.is_enabled(),
        authenticated: credential.is_some(),
        email: credential.map(|c| c.email),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingMailer, TestApp};
    use axum::http::StatusCode;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn set_cookies(response: &axum_test::TestResponse) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_session_cookie_attributes() {
        let config = SessionConfig {
            cookie_secure: true,
            ..Default::default()
        };

        let cookie = create_session_cookie("abc", &config);
        assert_eq!(cookie, "cardscan_session=abc; Path=/; HttpOnly; SameSite=lax; Max-Age=3600; Secure");
        assert!(clear_cookie("cardscan_session", &config).contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_login_disabled_is_401() {
        let app = TestApp::builder().build();

        app.server.get("/auth/google/login").await.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_redirects_with_state_cookie() {
        let app = TestApp::builder().email_enabled(RecordingMailer::new()).build();

        let response = app.server.get("/auth/google/login").await;

        response.assert_status(StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));

        let cookies = set_cookies(&response);
        let state_cookie = cookies.iter().find(|c| c.starts_with(STATE_COOKIE)).unwrap();
        assert!(state_cookie.contains("Path=/auth;"));
        let state_value = state_cookie.split(';').next().unwrap().split_once('=').unwrap().1;
        assert!(location.contains(&format!("state={state_value}")));
    }

    #[tokio::test]
    async fn test_callback_rejects_state_mismatch() {
        let app = TestApp::builder().email_enabled(RecordingMailer::new()).build();

        let response = app
            .server
            .get("/auth/google/callback")
            .add_query_param("code", "auth-code")
            .add_query_param("state", "forged")
            .add_header("cookie", format!("{STATE_COOKIE}=expected"))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_declined_consent() {
        let app = TestApp::builder().email_enabled(RecordingMailer::new()).build();

        let response = app
            .server
            .get("/auth/google/callback")
            .add_query_param("error", "access_denied")
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_creates_session() {
        let google = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.user",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&google)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "email": "jane@example.com" })))
            .mount(&google)
            .await;

        let app = TestApp::builder()
            .configure(|config| {
                config.auth.google.token_url = format!("{}/token", google.uri()).parse().unwrap();
                config.auth.google.userinfo_url = format!("{}/userinfo", google.uri()).parse().unwrap();
            })
            .email_enabled(RecordingMailer::new())
            .build();

        let response = app
            .server
            .get("/auth/google/callback")
            .add_query_param("code", "auth-code")
            .add_query_param("state", "s1")
            .add_header("cookie", format!("{STATE_COOKIE}=s1"))
            .await;

        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let cookies = set_cookies(&response);
        let session_cookie = cookies.iter().find(|c| c.starts_with("cardscan_session=")).unwrap();
        let token = session_cookie.split(';').next().unwrap().trim_start_matches("cardscan_session=");

        let session = app
            .server
            .get("/auth/session")
            .add_header("cookie", format!("cardscan_session={token}"))
            .await;
        let body: SessionResponse = session.json();
        assert!(body.authenticated);
        assert_eq!(body.email.as_deref(), Some("jane@example.com"));

        // The state cookie is expired on the same path it was issued for
        let cleared = cookies.iter().find(|c| c.starts_with(STATE_COOKIE)).unwrap();
        assert!(cleared.starts_with(&format!("{STATE_COOKIE}=;")));
        assert!(cleared.contains("Path=/auth;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_session_and_logout() {
        let app = TestApp::builder().email_enabled(RecordingMailer::new()).build();

        let anonymous: SessionResponse = app.server.get("/auth/session").await.json();
        assert!(anonymous.email_enabled);
        assert!(!anonymous.authenticated);

        let response = app.server.post("/auth/logout").await;
        response.assert_status_ok();
        assert!(set_cookies(&response).iter().any(|c| c.starts_with("cardscan_session=;")));
    }
}
