//! API request/response models for card scanning.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::ExtractedRecord;

/// Multipart form accepted by the upload endpoint (documentation only).
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct CardUploadForm {
    /// Image of the business card
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub message: String,
    /// The extracted record, as appended to the spreadsheet
    pub data: ExtractedRecord,
}

impl UploadResponse {
    pub fn saved(data: ExtractedRecord) -> Self {
        Self {
            message: "Data extracted and saved successfully.".to_string(),
            data,
        }
    }
}
