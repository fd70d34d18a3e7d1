//! Shared construction of outbound HTTP clients.

use std::time::Duration;

use reqwest::Client;

/// Build a reqwest client bounded by `timeout`.
///
/// reqwest is built without a bundled crypto provider, so the process-wide rustls provider is
/// installed here if `main` has not already done so (tests, library use).
pub fn client(timeout: Duration) -> reqwest::Result<Client> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Client::builder().timeout(timeout).build()
}

/// Makes sure a url has a trailing slash.
///
/// Joining '/hello' and 'world' gives '/world', but '/hello/' and 'world' gives '/hello/world',
/// so call this before calling .join
pub fn ensure_slash(url: &url::Url) -> url::Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}
