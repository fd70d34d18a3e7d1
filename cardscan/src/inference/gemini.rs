//! Gemini `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{EXTRACTION_PROMPT, InferenceClient, InferenceError};
use crate::config::InferenceConfig;
use crate::http::ensure_slash;
use crate::types::UploadedImage;

/// Calls `POST {base_url}/v1beta/models/{model}:generateContent` with the prompt and inline image.
pub struct GeminiClient {
    client: Client,
    base_url: Url,
    model: String,
    api_key: String,
    request_timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: String, config: &InferenceConfig) -> Result<Self, InferenceError> {
        let client = crate::http::client(config.timeout)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
            request_timeout: config.timeout,
        })
    }

    fn endpoint(&self) -> Result<Url, InferenceError> {
        ensure_slash(&self.base_url)
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .map_err(|e| InferenceError::Decode(format!("invalid inference URL: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate's parts
    fn into_text(self) -> Result<String, InferenceError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(InferenceError::EmptyResponse { reason: block_reason });
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(InferenceError::EmptyResponse {
                reason: block_reason.or(candidate.finish_reason),
            });
        }

        Ok(text)
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    #[instrument(skip(self, image), fields(model = %self.model, media_type = %image.media_type, len = image.bytes.len()), err)]
    async fn extract(&self, image: &UploadedImage) -> Result<String, InferenceError> {
        let url = self.endpoint()?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    RequestPart::Text { text: EXTRACTION_PROMPT },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: &image.media_type,
                            data: image.to_base64(),
                        },
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.request_timeout)
                } else {
                    InferenceError::Request(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status, "Gemini API returned an error");
            return Err(InferenceError::Status { status, body });
        }

        // Get the response body as text first for logging
        let body_text = response.text().await?;
        debug!(len = body_text.len(), "Gemini response received");

        let parsed: GenerateContentResponse = serde_json::from_str(&body_text).map_err(|e| {
            tracing::error!("Failed to parse Gemini response as JSON. Error: {}", e);
            InferenceError::Decode(e.to_string())
        })?;

        parsed.into_text()
    }
}
