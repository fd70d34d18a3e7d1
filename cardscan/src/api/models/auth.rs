//! API request/response models for sign-in state.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Current sign-in state of the browser session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// Whether Google sign-in (and therefore email sending) is available
    pub email_enabled: bool,
    pub authenticated: bool,
    /// Address mail will be sent from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Query parameters Google appends to the OAuth redirect
#[derive(Debug, Deserialize, IntoParams)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set when the user declined consent
    pub error: Option<String>,
}
