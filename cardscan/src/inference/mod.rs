//! Multimodal inference: turns a card image into the model's raw text answer.
//!
//! The [`InferenceClient`] trait is the seam the pipeline depends on. [`GeminiClient`] is the
//! production implementation calling the Gemini `generateContent` REST endpoint; tests substitute
//! their own implementations.
//!
//! The client does not interpret the answer. Stripping code fences and decoding JSON is the job
//! of [`crate::parser`].

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error as ThisError;

use crate::types::UploadedImage;

/// Instruction sent alongside every card image.
pub const EXTRACTION_PROMPT: &str = "Extract the following information from this business card image: \
Company Name, Personal Name, Designation, up to three Phone numbers, Email, Website, and Address. \
Return the result as a JSON object with keys \"companyName\", \"personalName\", \"designation\", \
\"phone1\", \"phone2\", \"phone3\", \"email\", \"website\", and \"address\". \
If a value is not found for any field, return an empty string for that key.";

#[derive(ThisError, Debug)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference request timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("inference response contained no text{}", .reason.as_ref().map(|r| format!(" ({r})")).unwrap_or_default())]
    EmptyResponse { reason: Option<String> },

    #[error("failed to decode inference response: {0}")]
    Decode(String),
}

/// A multimodal model that can read a business card.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Send the extraction prompt and image; return the model's text unmodified.
    async fn extract(&self, image: &UploadedImage) -> Result<String, InferenceError>;
}
