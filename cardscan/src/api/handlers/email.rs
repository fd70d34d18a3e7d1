use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

use crate::{
    AppState,
    api::models::email::{MessageResponse, SendEmailRequest},
    errors::{Error, ErrorResponse},
    types::DelegatedCredential,
};

/// Send an email as the signed-in user
#[utoipa::path(
    post,
    path = "/send-email",
    tag = "email",
    summary = "Send an email",
    description = "Sends an HTML email from the signed-in Google account. Requires a session created through `/auth/google/login`.",
    request_body = SendEmailRequest,
    responses(
        (status = 200, description = "Email sent", body = MessageResponse),
        (status = 400, description = "Malformed request or recipient address", body = ErrorResponse),
        (status = 401, description = "No signed-in session, or sign-in is not configured", body = ErrorResponse),
        (status = 500, description = "Sending failed", body = ErrorResponse),
    ),
    security(("SessionCookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn send_email(
    State(state): State<AppState>,
    credential: Option<DelegatedCredential>,
    request: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, Error> {
    let (Some(providers), Some(credential)) = (state.email.providers(), credential) else {
        return Err(Error::Unauthenticated { message: None });
    };

    let Json(request) = request.map_err(|e| Error::Validation {
        message: format!("Invalid email request: {}", e.body_text()),
    })?;

    providers.mailer.send(&credential, &request.into()).await?;

    Ok(Json(MessageResponse {
        message: "Email sent successfully".to_string(),
    }))
}
