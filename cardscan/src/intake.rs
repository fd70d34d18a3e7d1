//! Image intake: pulls the card image out of a multipart upload.
//!
//! Exactly one field named `file` is read; other fields are ignored. The upload is streamed and
//! aborted as soon as it exceeds the configured size limit, so an oversized body is never held
//! in memory in full.

use axum::{extract::Multipart, http::StatusCode};
use bytes::BytesMut;
use tracing::{debug, instrument, warn};

use crate::errors::{Error, Result};
use crate::types::UploadedImage;

/// Name of the multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// Read the card image from a multipart body.
///
/// Fails with [`Error::Validation`] when no `file` field is present, when it is empty, or when
/// its media type is not an image type, and with [`Error::PayloadTooLarge`] when it exceeds
/// `max_bytes`.
#[instrument(skip(multipart), err)]
pub async fn read_image(multipart: &mut Multipart, max_bytes: u64) -> Result<UploadedImage> {
    while let Some(mut field) = multipart.next_field().await.map_err(|e| Error::Validation {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "Ignoring unexpected multipart field");
            continue;
        }

        let file_name = field.file_name().map(|s| s.to_string());
        let declared_type = field.content_type().map(|s| s.to_string());

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            // The router-level body limit surfaces here as a multipart error
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                too_large(max_bytes)
            } else {
                Error::Validation {
                    message: format!("Failed to read file chunk: {e}"),
                }
            }
        })? {
            if (buffer.len() + chunk.len()) as u64 > max_bytes {
                warn!(max_bytes, "Upload size limit exceeded, aborting");
                return Err(too_large(max_bytes));
            }
            buffer.extend_from_slice(&chunk);
        }

        if buffer.is_empty() {
            return Err(Error::Validation {
                message: "Uploaded file is empty".to_string(),
            });
        }

        let media_type = resolve_media_type(declared_type.as_deref(), file_name.as_deref())?;

        debug!(len = buffer.len(), media_type = %media_type, file_name = ?file_name, "Read uploaded image");

        return Ok(UploadedImage {
            bytes: buffer.freeze(),
            media_type,
            file_name,
        });
    }

    Err(Error::Validation {
        message: "No file found".to_string(),
    })
}

fn too_large(max_bytes: u64) -> Error {
    Error::PayloadTooLarge {
        message: format!(
            "File size exceeds maximum allowed size of {} bytes ({} MB)",
            max_bytes,
            max_bytes / (1024 * 1024)
        ),
    }
}

/// Pick the image media type from the declared part type, falling back to the file extension.
fn resolve_media_type(declared: Option<&str>, file_name: Option<&str>) -> Result<String> {
    // Parameters such as `; name=card.png` are dropped; an unparseable type falls back to the name
    let declared = declared
        .and_then(|t| t.trim().parse::<mime_guess::mime::Mime>().ok())
        .map(|mime| mime.essence_str().to_ascii_lowercase())
        .filter(|t| t != "application/octet-stream");

    let media_type = match declared {
        Some(t) => t,
        None => file_name
            .and_then(|name| mime_guess::from_path(name).first())
            .map(|mime| mime.essence_str().to_string())
            .ok_or_else(|| Error::Validation {
                message: "Could not determine the uploaded file's media type".to_string(),
            })?,
    };

    if !media_type.starts_with("image/") {
        return Err(Error::Validation {
            message: format!("Unsupported file type '{media_type}', expected an image"),
        });
    }

    Ok(media_type)
}
