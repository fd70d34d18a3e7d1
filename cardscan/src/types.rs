//! Common type definitions shared across the scan pipeline.
//!
//! This module defines:
//! - [`ExtractedRecord`]: the nine-field contact record derived from a business card
//! - [`UploadedImage`]: the ephemeral image payload handed to the inference client
//! - [`DelegatedCredential`]: a user's OAuth access token for the email workflow
//! - [`ScanId`]: per-request identifier used to correlate pipeline log lines
//!
//! # Column Layout
//!
//! The record fields map 1:1 onto spreadsheet columns A-I, in the order given by
//! [`ExtractedRecord::COLUMN_TITLES`] and [`ExtractedRecord::to_row`].

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

pub type ScanId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Contact details extracted from a single business card.
///
/// Every field defaults to the empty string when the model found no value, or when the key is
/// missing from the model output entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractedRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub company_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub personal_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub designation: String,
    #[serde(deserialize_with = "lenient_string")]
    pub phone1: String,
    #[serde(deserialize_with = "lenient_string")]
    pub phone2: String,
    #[serde(deserialize_with = "lenient_string")]
    pub phone3: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(deserialize_with = "lenient_string")]
    pub website: String,
    #[serde(deserialize_with = "lenient_string")]
    pub address: String,
}

impl ExtractedRecord {
    /// Header row written to an empty sheet, columns A-I.
    pub const COLUMN_TITLES: [&'static str; 9] = [
        "Company Name",
        "Personal Name",
        "Designation",
        "Phone 1",
        "Phone 2",
        "Phone 3",
        "Email",
        "Website",
        "Address",
    ];

    /// The record as a spreadsheet row, in column order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.company_name.clone(),
            self.personal_name.clone(),
            self.designation.clone(),
            self.phone1.clone(),
            self.phone2.clone(),
            self.phone3.clone(),
            self.email.clone(),
            self.website.clone(),
            self.address.clone(),
        ]
    }

    pub fn header_row() -> Vec<String> {
        Self::COLUMN_TITLES.iter().map(|title| title.to_string()).collect()
    }
}

/// Accept strings, numbers and booleans as text; `null` becomes the empty string.
///
/// Models occasionally emit phone numbers as bare JSON numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!("expected a string, found {other}"))),
    }
}

/// An uploaded card image. Lives only for the duration of one request.
#[derive(Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub media_type: String,
    pub file_name: Option<String>,
}

impl UploadedImage {
    /// Standard base64 of the image bytes, as expected by inline-data model inputs
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("len", &self.bytes.len())
            .field("media_type", &self.media_type)
            .field("file_name", &self.file_name)
            .finish()
    }
}

/// OAuth access token allowing the service to send mail as the signed-in user.
#[derive(Clone, PartialEq, Eq)]
pub struct DelegatedCredential {
    pub access_token: String,
    /// Address of the account that granted the token
    pub email: String,
}

impl fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("access_token", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}
