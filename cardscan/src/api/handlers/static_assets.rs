//! HTTP handlers for the embedded browser page.

use axum::{
    body::Body,
    http::{Response, StatusCode, Uri, header},
    response::IntoResponse,
};
use tracing::{debug, instrument};

use crate::static_assets;

/// Serve an embedded asset; `/` and directory paths serve `index.html`
#[instrument]
pub async fn serve_embedded_asset(uri: Uri) -> impl IntoResponse {
    let mut path = uri.path().trim_start_matches('/');

    if path.is_empty() || path.ends_with('/') {
        path = "index.html";
    }

    let Some(content) = static_assets::Assets::get(path) else {
        debug!("No embedded asset for {}", uri.path());
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut response = Response::new(Body::from(content.data.into_owned()));
    if let Ok(value) = mime.as_ref().parse() {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    // The page is small and changes with every release
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    response
}
