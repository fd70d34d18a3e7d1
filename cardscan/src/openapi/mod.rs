//! OpenAPI documentation, rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{api, errors, types};

/// Session cookie set by the Google sign-in callback.
struct SessionCookieAddon;

impl Modify for SessionCookieAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "SessionCookie".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "cardscan_session",
                    "Signed session cookie created by `/auth/google/callback`. Sign in through \
                     `/auth/google/login` in a browser to obtain one.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "cardscan",
        description = "Extract contact details from business card images into a spreadsheet, and email the people you meet."
    ),
    modifiers(&SessionCookieAddon),
    paths(
        api::handlers::cards::upload_card,
        api::handlers::email::send_email,
        api::handlers::auth::login,
        api::handlers::auth::callback,
        api::handlers::auth::logout,
        api::handlers::auth::get_session,
    ),
    components(
        schemas(
            types::ExtractedRecord,
            api::models::cards::CardUploadForm,
            api::models::cards::UploadResponse,
            api::models::email::SendEmailRequest,
            api::models::email::MessageResponse,
            api::models::auth::SessionResponse,
            errors::ErrorResponse,
            errors::ErrorKind,
        )
    ),
    tags(
        (name = "cards", description = "Scan business cards.

Each upload is sent to a multimodal model, the answer is parsed into a nine-field contact record, and the record is appended as one row to the configured Google Sheet. The header row is written once, when the sheet is empty."),
        (name = "email", description = "Send email from the signed-in Google account."),
        (name = "authentication", description = "Google sign-in for the email workflow. Scanning does not require sign-in."),
    )
)]
pub struct ApiDoc;
