//! # cardscan: Business Card Scanner
//!
//! `cardscan` turns photos of business cards into spreadsheet rows. A browser uploads a card
//! image, a multimodal model reads it, and the extracted contact details are appended to a Google
//! Sheet. Users who sign in with Google can also email the people they met straight from the
//! page.
//!
//! ## Request Flow
//!
//! An upload to `/upload` (or `/api/upload`) is handled by the [`pipeline::ScanPipeline`]:
//!
//! 1. **Intake** ([`intake`]): the `file` field is read from the multipart body, size-limited and
//!    checked to be an image.
//! 2. **Inference** ([`inference`]): the image and a fixed extraction prompt are sent to Gemini.
//! 3. **Parsing** ([`parser`]): code fences are stripped from the answer and the JSON is decoded
//!    into an [`types::ExtractedRecord`].
//! 4. **Persistence** ([`store`]): the header row is written if the sheet is empty, then the
//!    record is appended as one row. Both steps run under a per-range lock.
//!
//! Nothing is kept between requests; the spreadsheet is the only durable state.
//!
//! The email workflow ([`auth`], [`email`]) is optional. With a Google OAuth client configured,
//! `/auth/google/login` obtains a delegated `gmail.send` token that is kept in a signed session
//! cookie, and `/send-email` sends HTML mail through the Gmail API as that user.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use cardscan::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = cardscan::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     cardscan::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod email;
pub mod errors;
mod http;
pub mod inference;
pub mod intake;
mod openapi;
pub mod parser;
pub mod pipeline;
mod static_assets;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    auth::{EmailFeature, session::SessionKeys},
    config::CorsOrigin,
    inference::{GeminiClient, InferenceClient},
    openapi::ApiDoc,
    pipeline::ScanPipeline,
    store::RecordStore,
};
pub use config::Config;

/// Headroom above the image size limit for multipart framing and other form fields
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .pipeline(pipeline)
///     .email(EmailFeature::Disabled)
///     .session_keys(keys)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub pipeline: ScanPipeline,
    pub email: EmailFeature,
    pub session_keys: SessionKeys,
}

impl AppState {
    /// Wire production collaborators from configuration.
    ///
    /// A missing API key or spreadsheet leaves the pipeline unconfigured rather than failing
    /// startup; uploads then report a configuration error.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let inference: Option<Arc<dyn InferenceClient>> = match config.inference.api_key.clone().filter(|k| !k.is_empty()) {
            Some(api_key) => Some(Arc::new(GeminiClient::new(api_key, &config.inference)?)),
            None => {
                warn!("GEMINI_API_KEY is not configured; uploads will fail");
                None
            }
        };

        let store = match RecordStore::from_config(&config.store) {
            Ok(Some(store)) => Some(Arc::new(store)),
            Ok(None) => {
                warn!("No spreadsheet configured (GOOGLE_SHEET_ID); uploads will fail");
                None
            }
            Err(e) => {
                warn!("Spreadsheet storage unavailable, uploads will fail: {e}");
                None
            }
        };

        let pipeline = ScanPipeline::new(inference, store)
            .with_max_upload_bytes(config.limits.max_upload_bytes)
            .with_inference_timeout(config.inference.timeout);

        let email = EmailFeature::from_config(&config)?;
        let session_keys = SessionKeys::from_config(&config.auth.session);

        Ok(Self::builder()
            .config(config)
            .pipeline(pipeline)
            .email(email)
            .session_keys(session_keys)
            .build())
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials)
        .expose_headers(vec![header::LOCATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - Card upload and email routes, each under its bare path and an `/api` alias
/// - Google sign-in routes under `/auth`
/// - `/healthz`, API docs at `/docs`, and the embedded page as the fallback
/// - Optional Prometheus metrics at `/internal/metrics`
/// - CORS (only when origins are configured) and request tracing
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limit = usize::try_from(state.pipeline.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let upload = post(api::handlers::cards::upload_card).layer(DefaultBodyLimit::max(upload_limit));
    let send_email = post(api::handlers::email::send_email);

    let auth_routes = Router::new()
        .route("/auth/google/login", get(api::handlers::auth::login))
        .route("/auth/google/callback", get(api::handlers::auth::callback))
        .route("/auth/logout", post(api::handlers::auth::logout))
        .route("/auth/session", get(api::handlers::auth::get_session));

    let router = Router::new()
        .route("/upload", upload.clone())
        .route("/api/upload", upload)
        .route("/send-email", send_email.clone())
        .route("/api/send-email", send_email)
        .merge(auth_routes)
        .route("/healthz", get(|| async { "OK" }))
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .fallback(api::handlers::static_assets::serve_embedded_asset);

    let mut router = if state.config.cors.allowed_origins.is_empty() {
        router
    } else {
        router.layer(create_cors_layer(&state.config)?)
    };

    // Add Prometheus metrics if enabled
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct.
///
/// 1. **Create**: [`Application::new`] wires collaborators from configuration and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all collaborators initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting cardscan with configuration: {:#?}", config);

        let app_state = AppState::from_config(config.clone())?;
        Self::from_state(app_state)
    }

    /// Build the application around an already-wired state
    pub fn from_state(app_state: AppState) -> anyhow::Result<Self> {
        let router = build_router(&app_state)?;
        Ok(Self {
            router,
            config: app_state.config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "cardscan listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{TestApp, create_test_config};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_healthz() {
        let app = TestApp::builder().build();

        let response = app.server.get("/healthz").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn test_docs_are_served() {
        let app = TestApp::builder().build();

        let response = app.server.get("/docs").await;
        response.assert_status_ok();
        assert!(response.text().contains("<html"));
    }

    #[tokio::test]
    async fn test_index_page_is_served() {
        let app = TestApp::builder().build();

        let response = app.server.get("/").await;
        response.assert_status_ok();
        assert!(response.text().contains("Business Card Scanner"));
    }

    #[tokio::test]
    async fn test_application_without_credentials_starts() {
        let mut config = create_test_config();
        config.store.spreadsheet_id = None;

        let server = Application::new(config).await.unwrap().into_test_server();

        server.get("/healthz").await.assert_status_ok();
        let response = server.post("/upload").text("x").await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json();
        assert_eq!(body["kind"], "ConfigurationError");
    }

    #[tokio::test]
    async fn test_unreadable_credentials_leave_store_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config();
        config.inference.api_key = Some("test-key".to_string());
        config.store.credentials_path = dir.path().join("missing.json");

        let state = AppState::from_config(config).unwrap();
        let err = state.pipeline.check_ready().unwrap_err();
        assert!(err.to_string().contains("Spreadsheet storage is not configured"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_when_enabled() {
        let mut config = create_test_config();
        config.enable_metrics = true;

        let server = Application::from_state(AppState::from_config(config).unwrap())
            .unwrap()
            .into_test_server();

        server.get("/healthz").await.assert_status_ok();
        server.get("/internal/metrics").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_metrics_endpoint_absent_by_default() {
        let app = TestApp::builder().build();

        app.server.get("/internal/metrics").await.assert_status(StatusCode::NOT_FOUND);
    }
}
