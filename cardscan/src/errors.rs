use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

use crate::inference::InferenceError;
use crate::store::StoreError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Missing or invalid upload input
    #[error("{message}")]
    Validation { message: String },

    /// Upload exceeded the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// A required external credential is not configured
    #[error("{message}")]
    Configuration { message: String },

    /// The multimodal model call failed or returned nothing
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Model output could not be decoded to a contact record
    #[error("Failed to parse model response: {message}")]
    Parse { message: String },

    /// Spreadsheet read or write failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Email send attempted without a delegated credential
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Outbound email could not be composed or delivered
    #[error("Failed to {operation}")]
    Email { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error classes reported to clients alongside the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ErrorKind {
    ValidationError,
    ConfigurationError,
    InferenceError,
    ParseError,
    StoreError,
    AuthError,
    EmailError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::InferenceError => "InferenceError",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::StoreError => "StoreError",
            ErrorKind::AuthError => "AuthError",
            ErrorKind::EmailError => "EmailError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Configuration { .. }
            | Error::Inference(_)
            | Error::Parse { .. }
            | Error::Store(_)
            | Error::Email { .. }
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } | Error::PayloadTooLarge { .. } => ErrorKind::ValidationError,
            Error::Configuration { .. } => ErrorKind::ConfigurationError,
            Error::Inference(_) => ErrorKind::InferenceError,
            Error::Parse { .. } => ErrorKind::ParseError,
            Error::Store(_) => ErrorKind::StoreError,
            Error::Unauthenticated { .. } => ErrorKind::AuthError,
            Error::Email { .. } => ErrorKind::EmailError,
            Error::Other(_) => ErrorKind::InternalError,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::Configuration { message } => message.clone(),
            Error::Inference(_) => "Failed to extract information from the image".to_string(),
            Error::Parse { .. } => "The model returned a response that could not be read".to_string(),
            Error::Store(_) => "Failed to save the extracted information".to_string(),
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Unauthorized".to_string()),
            Error::Email { .. } => "Failed to send email".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }

    /// Underlying cause surfaced as `details` for server-side failures
    fn details(&self) -> Option<String> {
        match self {
            Error::Inference(_) | Error::Parse { .. } | Error::Store(_) | Error::Other(_) => Some(format!("{self:#}")),
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();

        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Inference(_) | Error::Parse { .. } | Error::Store(_) | Error::Email { .. } | Error::Other(_) => {
                tracing::error!(kind = kind.as_str(), "Request failed: {:#}", self);
            }
            Error::Configuration { .. } => {
                tracing::error!(kind = kind.as_str(), "Service misconfigured: {}", self);
            }
            Error::Unauthenticated { .. } => {
                tracing::info!(kind = kind.as_str(), "Authorization error: {}", self);
            }
            Error::Validation { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!(kind = kind.as_str(), "Client error: {}", self);
            }
        }

        let body = ErrorResponse {
            error: self.user_message(),
            kind,
            details: self.details(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
