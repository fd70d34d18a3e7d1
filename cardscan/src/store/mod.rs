//! Append-only persistence of extracted records to a spreadsheet.
//!
//! [`RecordStore`] implements the two-phase write used for every scan:
//!
//! 1. **Header provisioning** ([`RecordStore::ensure_header`]): read the first row of the target
//!    sheet and write the column titles if it is empty.
//! 2. **Append** ([`RecordStore::append_record`]): add one row with the record's nine fields.
//!
//! The pair runs under a per-range async lock ([`RangeLocks`]) so that two concurrent scans can
//! never both observe an empty header row, and an append can never land between another
//! request's header check and header write. Locking is in-process; multiple replicas writing to
//! the same sheet are not coordinated.
//!
//! The spreadsheet service itself is reached through the [`SheetsApi`] trait. [`GoogleSheets`]
//! talks to the Sheets v4 REST API; tests use an in-memory implementation.

mod credentials;
mod google;

pub use credentials::{ServiceAccountAuth, ServiceAccountKey, TokenSource};
pub use google::GoogleSheets;

use async_trait::async_trait;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use thiserror::Error as ThisError;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;
use crate::types::ExtractedRecord;

#[derive(ThisError, Debug)]
pub enum StoreError {
    /// The spreadsheet or sheet addressed by the range does not exist
    #[error("spreadsheet target not found: {0}")]
    NotFound(String),

    #[error("spreadsheet request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("spreadsheet request timed out after {0:?}")]
    Timeout(Duration),

    #[error("spreadsheet service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service account credentials: {0}")]
    Credentials(String),

    #[error("failed to decode spreadsheet response: {0}")]
    Decode(String),
}

/// Minimal view of a spreadsheet values API.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Read the rows in `range`. An existing but empty range yields an empty vector.
    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, StoreError>;

    /// Overwrite `range` with `rows`, interpreting values as if typed by a user.
    async fn update_values(&self, spreadsheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError>;

    /// Insert `rows` after the last row of the table found in `range`, storing values verbatim.
    async fn append_values(&self, spreadsheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError>;
}

/// Result of header provisioning for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    /// The first row already had values; nothing was written
    Present,
    /// The first row was empty and the column titles were written
    Written,
    /// The target does not exist yet; the append is left to create it
    TargetMissing,
}

/// Registry of async locks, one per spreadsheet range.
#[derive(Debug, Default)]
pub struct RangeLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RangeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `key`, created on first use.
    pub fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Quote a sheet name for A1 notation when it contains anything but letters, digits or `_`.
pub fn a1_range(sheet_name: &str, cells: &str) -> String {
    if sheet_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        format!("{sheet_name}!{cells}")
    } else {
        format!("'{}'!{cells}", sheet_name.replace('\'', "''"))
    }
}

/// Header provisioning and row appends against one sheet of one spreadsheet.
pub struct RecordStore {
    api: Arc<dyn SheetsApi>,
    spreadsheet_id: String,
    sheet_name: String,
    locks: Arc<RangeLocks>,
    call_timeout: Duration,
}

impl RecordStore {
    pub fn new(api: Arc<dyn SheetsApi>, spreadsheet_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            api,
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
            locks: Arc::new(RangeLocks::new()),
            call_timeout: StoreConfig::default().timeout,
        }
    }

    /// Bound each individual store call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Build the production store from configuration.
    ///
    /// Returns `Ok(None)` when no target spreadsheet is configured, and an error when the
    /// spreadsheet is configured but the service account key cannot be loaded.
    pub fn from_config(config: &StoreConfig) -> Result<Option<Self>, StoreError> {
        let Some(spreadsheet_id) = config.spreadsheet_id.clone() else {
            return Ok(None);
        };

        let key = ServiceAccountKey::load(config.service_account_json.as_deref(), &config.credentials_path)?;
        info!(client_email = %key.client_email, "Loaded spreadsheet service account");

        let auth = ServiceAccountAuth::new(key, config.timeout)?;
        let api = GoogleSheets::new(config.base_url.clone(), Arc::new(auth), config.timeout)?;

        Ok(Some(
            Self::new(Arc::new(api), spreadsheet_id, config.sheet_name.clone()).with_call_timeout(config.timeout),
        ))
    }

    pub fn header_range(&self) -> String {
        a1_range(&self.sheet_name, "A1:I1")
    }

    pub fn data_range(&self) -> String {
        a1_range(&self.sheet_name, "A:I")
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.call_timeout))?
    }

    /// Write the column titles to the first row if it holds no values.
    ///
    /// A missing target counts as "no header". Every other read failure is returned.
    #[instrument(skip(self), fields(range = %self.header_range()), err)]
    pub async fn ensure_header(&self) -> Result<HeaderState, StoreError> {
        let range = self.header_range();

        match self.bounded(self.api.get_values(&self.spreadsheet_id, &range)).await {
            Ok(rows) if rows.iter().flatten().any(|cell| !cell.trim().is_empty()) => {
                debug!("Header row already present");
                return Ok(HeaderState::Present);
            }
            Ok(_) => {}
            Err(StoreError::NotFound(target)) => {
                debug!(%target, "Header range does not exist yet");
            }
            Err(e) => return Err(e),
        }

        match self
            .bounded(
                self.api
                    .update_values(&self.spreadsheet_id, &range, vec![ExtractedRecord::header_row()]),
            )
            .await
        {
            Ok(()) => {
                info!("Wrote header row");
                Ok(HeaderState::Written)
            }
            Err(StoreError::NotFound(target)) => {
                warn!(%target, "Could not write header, target missing; leaving it to the append");
                Ok(HeaderState::TargetMissing)
            }
            Err(e) => Err(e),
        }
    }

    /// Append one row holding the record's fields in column order.
    #[instrument(skip(self, record), fields(range = %self.data_range()), err)]
    pub async fn append_record(&self, record: &ExtractedRecord) -> Result<(), StoreError> {
        self.bounded(
            self.api
                .append_values(&self.spreadsheet_id, &self.data_range(), vec![record.to_row()]),
        )
        .await
    }

    /// Hold the critical section for this store's range until the guard is dropped.
    async fn lock_range(&self) -> OwnedMutexGuard<()> {
        self.locks
            .lock_for(&format!("{}/{}", self.spreadsheet_id, self.sheet_name))
            .lock_owned()
            .await
    }

    /// Provision the header if needed and append the record, as one critical section per range.
    ///
    /// `on_header_checked` runs once the header step has succeeded, before the append.
    pub async fn save(
        &self,
        record: &ExtractedRecord,
        on_header_checked: impl FnOnce(HeaderState),
    ) -> Result<HeaderState, StoreError> {
        let _guard = self.lock_range().await;

        let header = self.ensure_header().await?;
        on_header_checked(header);
        self.append_record(record).await?;
        Ok(header)
    }
}
