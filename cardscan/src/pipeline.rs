//! Per-request scan orchestration.
//!
//! A scan moves strictly forward through
//!
//! ```text
//! Received -> Validated -> Inferred -> Parsed -> HeaderChecked -> Appended -> Completed
//! ```
//!
//! and may fail from any stage. The pipeline holds no state across requests other than its
//! injected collaborators; the per-range lock inside [`RecordStore`] is the only coordination
//! between concurrent scans.

use axum::extract::Multipart;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::inference::{InferenceClient, InferenceError};
use crate::store::{HeaderState, RecordStore};
use crate::types::{ExtractedRecord, ScanId, UploadedImage, abbrev_uuid};
use crate::{intake, parser};

/// Where a scan is in its lifecycle. Used for logging and failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Validated,
    Inferred,
    Parsed,
    HeaderChecked,
    Appended,
    Completed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Validated => "validated",
            PipelineStage::Inferred => "inferred",
            PipelineStage::Parsed => "parsed",
            PipelineStage::HeaderChecked => "header_checked",
            PipelineStage::Appended => "appended",
            PipelineStage::Completed => "completed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub scan_id: ScanId,
    pub record: ExtractedRecord,
    pub header: HeaderState,
}

/// Collaborators available to a scan, checked before any input is read.
struct Ready<'a> {
    inference: &'a Arc<dyn InferenceClient>,
    store: &'a RecordStore,
}

/// Sequences intake, inference, parsing and persistence for one upload.
#[derive(Clone)]
pub struct ScanPipeline {
    inference: Option<Arc<dyn InferenceClient>>,
    store: Option<Arc<RecordStore>>,
    max_upload_bytes: u64,
    inference_timeout: Duration,
}

impl ScanPipeline {
    /// `None` collaborators mark a missing configuration; uploads then fail with a
    /// configuration error before the request body is read.
    pub fn new(inference: Option<Arc<dyn InferenceClient>>, store: Option<Arc<RecordStore>>) -> Self {
        Self {
            inference,
            store,
            max_upload_bytes: crate::config::LimitsConfig::default().max_upload_bytes,
            inference_timeout: crate::config::InferenceConfig::default().timeout,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    fn ready(&self) -> Result<Ready<'_>> {
        let inference = self.inference.as_ref().ok_or_else(|| Error::Configuration {
            message: "GEMINI_API_KEY is not configured".to_string(),
        })?;
        let store = self.store.as_deref().ok_or_else(|| Error::Configuration {
            message: "Spreadsheet storage is not configured".to_string(),
        })?;
        Ok(Ready { inference, store })
    }

    /// Fail with a configuration error if the inference client or the store is missing.
    pub fn check_ready(&self) -> Result<()> {
        self.ready().map(|_| ())
    }

    /// Check configuration, read the image from the multipart body, then run the scan.
    pub async fn run(&self, multipart: &mut Multipart) -> Result<ScanOutcome> {
        let scan_id = Uuid::new_v4();
        let span = info_span!("scan", scan_id = %abbrev_uuid(&scan_id));

        async {
            let mut stage = PipelineStage::Received;
            let result = async {
                let ready = self.ready()?;
                let image = intake::read_image(multipart, self.max_upload_bytes).await?;
                stage = PipelineStage::Validated;
                self.scan(&ready, scan_id, image, &mut stage).await
            }
            .await;

            record_outcome(result, stage)
        }
        .instrument(span)
        .await
    }

    /// Run a scan on an image that has already passed intake.
    pub async fn process(&self, image: UploadedImage) -> Result<ScanOutcome> {
        let scan_id = Uuid::new_v4();
        let span = info_span!("scan", scan_id = %abbrev_uuid(&scan_id));

        async {
            let mut stage = PipelineStage::Validated;
            let result = async {
                let ready = self.ready()?;
                self.scan(&ready, scan_id, image, &mut stage).await
            }
            .await;

            record_outcome(result, stage)
        }
        .instrument(span)
        .await
    }

    async fn scan(
        &self,
        ready: &Ready<'_>,
        scan_id: ScanId,
        image: UploadedImage,
        stage: &mut PipelineStage,
    ) -> Result<ScanOutcome> {
        info!(media_type = %image.media_type, len = image.bytes.len(), "Scanning card");

        let raw = tokio::time::timeout(self.inference_timeout, ready.inference.extract(&image))
            .await
            .map_err(|_| InferenceError::Timeout(self.inference_timeout))??;
        *stage = PipelineStage::Inferred;
        drop(image);

        let record = parser::parse_record(&raw).inspect_err(|_| {
            // Truncated to keep log lines bounded
            let preview: String = raw.chars().take(200).collect();
            warn!(%preview, "Model response could not be parsed");
        })?;
        *stage = PipelineStage::Parsed;

        let header = ready
            .store
            .save(&record, |_| *stage = PipelineStage::HeaderChecked)
            .await?;
        *stage = PipelineStage::Appended;

        info!(header = ?header, "Card saved");
        *stage = PipelineStage::Completed;

        Ok(ScanOutcome { scan_id, record, header })
    }
}

/// Emit the scan counter and a failure log line naming the last stage reached.
fn record_outcome(result: Result<ScanOutcome>, stage: PipelineStage) -> Result<ScanOutcome> {
    match &result {
        Ok(_) => {
            metrics::counter!("cardscan_scans_total", "outcome" => "completed").increment(1);
        }
        Err(e) => {
            let kind = e.kind().as_str();
            metrics::counter!("cardscan_scans_total", "outcome" => kind).increment(1);
            warn!(stage = %stage, kind, "Scan failed: {}", e);
        }
    }
    result
}
