//! API request/response models for sending email.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::email::OutgoingEmail;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendEmailRequest {
    /// Recipient address
    pub to: String,
    pub subject: String,
    /// HTML body
    pub body: String,
}

impl From<SendEmailRequest> for OutgoingEmail {
    fn from(request: SendEmailRequest) -> Self {
        Self {
            to: request.to,
            subject: request.subject,
            html_body: request.body,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}
