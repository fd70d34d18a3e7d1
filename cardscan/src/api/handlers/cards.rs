use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};

use crate::{
    AppState,
    api::models::cards::{CardUploadForm, UploadResponse},
    errors::{Error, ErrorResponse},
};

/// Scan a business card
#[utoipa::path(
    post,
    path = "/upload",
    tag = "cards",
    summary = "Scan a business card",
    description = "Extracts contact details from the uploaded card image and appends them as a row to the configured spreadsheet. \
The header row is written first if the sheet is empty.",
    request_body(
        content = CardUploadForm,
        content_type = "multipart/form-data",
        description = "Card image in the `file` field"
    ),
    responses(
        (status = 200, description = "Record extracted and saved", body = UploadResponse),
        (status = 400, description = "No file, or the file is not an image", body = ErrorResponse),
        (status = 413, description = "File exceeds the upload size limit", body = ErrorResponse),
        (status = 500, description = "Missing configuration, or the model or spreadsheet call failed", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upload_card(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, Error> {
    // Configuration problems are reported before the body is looked at
    state.pipeline.check_ready()?;

    let mut multipart = multipart.map_err(|e| Error::Validation {
        message: format!("Expected a multipart form upload: {e}"),
    })?;

    let outcome = state.pipeline.run(&mut multipart).await?;

    Ok(Json(UploadResponse::saved(outcome.record)))
}
