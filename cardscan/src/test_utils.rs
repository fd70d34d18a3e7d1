//! Test doubles and an in-process application harness.

use async_trait::async_trait;
use axum_test::TestServer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::{EmailFeature, oauth::GoogleOAuth, session};
use crate::config::Config;
use crate::email::{MailSender, OutgoingEmail};
use crate::errors::Error;
use crate::inference::{InferenceClient, InferenceError};
use crate::pipeline::ScanPipeline;
use crate::store::{RecordStore, SheetsApi, StoreError};
use crate::types::{DelegatedCredential, UploadedImage};
use crate::{AppState, build_router};

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.store.spreadsheet_id = Some("test-spreadsheet".to_string());
    config.auth.session.secret = Some("test-session-secret".to_string());
    config
}

enum Reply {
    Text(String),
    Status(u16),
    Hang,
}

/// Scripted [`InferenceClient`] that counts its calls.
pub struct FakeInference {
    reply: Reply,
    pub calls: AtomicUsize,
}

impl FakeInference {
    fn with(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers every image with `text`
    pub fn replying(text: &str) -> Arc<Self> {
        Self::with(Reply::Text(text.to_string()))
    }

    /// Fails every call as if the model service returned `status`
    pub fn failing(status: u16) -> Arc<Self> {
        Self::with(Reply::Status(status))
    }

    /// Never answers
    pub fn hanging() -> Arc<Self> {
        Self::with(Reply::Hang)
    }
}

#[async_trait]
impl InferenceClient for FakeInference {
    async fn extract(&self, _image: &UploadedImage) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Status(status) => Err(InferenceError::Status {
                status: *status,
                body: "injected failure".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Failure injected into every subsequent call of one kind.
#[derive(Debug, Clone)]
pub enum Fault {
    NotFound,
    Status(u16),
    Hang,
}

/// In-memory [`SheetsApi`]. Ranges address sheets by name; everything after `!` is ignored.
#[derive(Default)]
pub struct InMemorySheets {
    /// Sheet name -> rows
    sheets: Mutex<HashMap<String, Vec<Vec<String>>>>,
    read_fault: Mutex<Option<Fault>>,
    write_fault: Mutex<Option<Fault>>,
    append_fault: Mutex<Option<Fault>>,
    pub reads: AtomicUsize,
    pub header_writes: AtomicUsize,
    pub appends: AtomicUsize,
}

fn sheet_of(range: &str) -> String {
    let sheet = range.rsplit_once('!').map(|(sheet, _)| sheet).unwrap_or(range);
    sheet.trim_matches('\'').replace("''", "'")
}

async fn apply(fault: Option<Fault>, range: &str) -> Result<(), StoreError> {
    match fault {
        None => Ok(()),
        Some(Fault::NotFound) => Err(StoreError::NotFound(range.to_string())),
        Some(Fault::Status(status)) => Err(StoreError::Status {
            status,
            body: "injected".to_string(),
        }),
        Some(Fault::Hang) => std::future::pending().await,
    }
}

impl InMemorySheets {
    /// A spreadsheet with no sheets at all
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_rows(sheet: &str, rows: Vec<Vec<String>>) -> Arc<Self> {
        let store = Self::default();
        store.sheets.lock().unwrap().insert(sheet.to_string(), rows);
        Arc::new(store)
    }

    pub fn fail_reads(&self, fault: Fault) {
        *self.read_fault.lock().unwrap() = Some(fault);
    }

    pub fn fail_header_writes(&self, fault: Fault) {
        *self.write_fault.lock().unwrap() = Some(fault);
    }

    pub fn fail_appends(&self, fault: Fault) {
        *self.append_fault.lock().unwrap() = Some(fault);
    }

    pub fn rows(&self, sheet: &str) -> Vec<Vec<String>> {
        self.sheets.lock().unwrap().get(sheet).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SheetsApi for InMemorySheets {
    async fn get_values(&self, _spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let fault = self.read_fault.lock().unwrap().clone();
        apply(fault, range).await?;

        // Let concurrent callers interleave between the read and the write
        tokio::task::yield_now().await;

        let sheets = self.sheets.lock().unwrap();
        match sheets.get(&sheet_of(range)) {
            Some(rows) => Ok(rows.first().cloned().into_iter().collect()),
            None => Err(StoreError::NotFound(range.to_string())),
        }
    }

    async fn update_values(&self, _spreadsheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        let fault = self.write_fault.lock().unwrap().clone();
        apply(fault, range).await?;
        self.header_writes.fetch_add(1, Ordering::SeqCst);

        let mut sheets = self.sheets.lock().unwrap();
        let sheet = sheets.entry(sheet_of(range)).or_default();
        let mut rows = rows.into_iter();
        match (sheet.first_mut(), rows.next()) {
            (Some(first), Some(header)) => *first = header,
            (None, Some(header)) => sheet.push(header),
            _ => {}
        }
        Ok(())
    }

    async fn append_values(&self, _spreadsheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        let fault = self.append_fault.lock().unwrap().clone();
        apply(fault, range).await?;
        self.appends.fetch_add(1, Ordering::SeqCst);

        self.sheets.lock().unwrap().entry(sheet_of(range)).or_default().extend(rows);
        Ok(())
    }
}

/// [`MailSender`] that records what it was asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(DelegatedCredential, OutgoingEmail)>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rejects every message as the Gmail API would on a revoked token
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn sent(&self) -> Vec<(DelegatedCredential, OutgoingEmail)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, credential: &DelegatedCredential, email: &OutgoingEmail) -> Result<(), Error> {
        if self.fail {
            return Err(Error::Email {
                operation: "send email: Gmail API returned 401".to_string(),
            });
        }
        self.sent.lock().unwrap().push((credential.clone(), email.clone()));
        Ok(())
    }
}

/// The full router over test doubles, served in-process.
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            config: create_test_config(),
            inference: None,
            sheets: Some(InMemorySheets::with_rows("Sheet1", vec![])),
            mailer: None,
        }
    }

    /// `Cookie` header value carrying a valid session for `email`
    pub fn session_cookie(&self, email: &str, access_token: &str) -> String {
        let credential = DelegatedCredential {
            access_token: access_token.to_string(),
            email: email.to_string(),
        };
        let session_config = &self.state.config.auth.session;
        let token = session::create_session_token(&credential, &self.state.session_keys, session_config)
            .expect("Failed to create session token");
        format!("{}={}", session_config.cookie_name, token)
    }
}

pub struct TestAppBuilder {
    config: Config,
    inference: Option<Arc<dyn InferenceClient>>,
    sheets: Option<Arc<InMemorySheets>>,
    mailer: Option<Arc<dyn MailSender>>,
}

impl TestAppBuilder {
    pub fn inference(mut self, inference: Arc<FakeInference>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn sheets(mut self, sheets: Arc<InMemorySheets>) -> Self {
        self.sheets = Some(sheets);
        self
    }

    /// No spreadsheet configured
    pub fn without_store(mut self) -> Self {
        self.sheets = None;
        self
    }

    pub fn max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.config.limits.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    /// Enable Google sign-in and route outgoing mail to `mailer`
    pub fn email_enabled(mut self, mailer: Arc<dyn MailSender>) -> Self {
        self.config.auth.google.client_id = Some("test-client-id".to_string());
        self.config.auth.google.client_secret = Some("test-client-secret".to_string());
        self.mailer = Some(mailer);
        self
    }

    pub fn build(self) -> TestApp {
        let config = self.config;

        let store = self.sheets.map(|sheets| {
            let spreadsheet_id = config.store.spreadsheet_id.clone().unwrap_or_default();
            Arc::new(RecordStore::new(sheets, spreadsheet_id, config.store.sheet_name.clone()).with_call_timeout(config.store.timeout))
        });
        let pipeline = ScanPipeline::new(self.inference, store)
            .with_max_upload_bytes(config.limits.max_upload_bytes)
            .with_inference_timeout(config.inference.timeout);

        let email = match self.mailer {
            Some(mailer) => {
                let google = &config.auth.google;
                let oauth = GoogleOAuth::new(
                    google.client_id.clone().unwrap_or_default(),
                    google.client_secret.clone().unwrap_or_default(),
                    google,
                    config.oauth_redirect_uri().expect("Failed to build redirect URI"),
                    Duration::from_secs(5),
                )
                .expect("Failed to create OAuth client");
                EmailFeature::enabled(oauth, mailer)
            }
            None => EmailFeature::Disabled,
        };

        let state = AppState::builder()
            .session_keys(session::SessionKeys::from_config(&config.auth.session))
            .config(config)
            .pipeline(pipeline)
            .email(email)
            .build();

        let router = build_router(&state).expect("Failed to build router");
        let server = TestServer::new(router).expect("Failed to create test server");

        TestApp { server, state }
    }
}
