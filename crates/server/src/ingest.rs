//! Upload admission pipeline.
//!
//! Per upload: admission gate, bounded decompression, fingerprint, staging
//! (with a queue reservation for created summaries), handoff. Everything up
//! to the handoff runs on the request path; summarization happens on the
//! worker pool.

use crate::admission::AdmissionGate;
use crate::lifecycle::SummaryLifecycle;
use crate::metrics;
use crate::parser::EncounterParser;
use crate::stager::{PendingStager, StageError};
use crate::worker::{ProcessingJob, WorkQueue};
use bytes::Bytes;
use logward_core::{Association, DecompressError, OwnerId, SummaryId, decompress};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

/// One upload as received.
#[derive(Clone, Debug)]
pub struct IngestRequest {
    pub owner: OwnerId,
    /// Gzip-compressed request body.
    pub body: Bytes,
    /// Decompressed size declared by the client.
    pub expected_size: u64,
}

/// Admission decision for an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Staged and queued for processing.
    Accepted {
        tracking_id: SummaryId,
        association: Association,
    },
    /// A recent upload of the same encounter exists; nothing was staged.
    Duplicate {
        existing_tracking_id: SummaryId,
        association: Association,
    },
}

/// Reasons an upload was refused before staging.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upload quota exceeded")]
    AdmissionDenied,

    #[error(transparent)]
    Decompress(#[from] DecompressError),

    #[error("invalid encounter log: {0}")]
    InvalidEnvelope(String),

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl IngestError {
    /// Stable error code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdmissionDenied => "admission_denied",
            Self::Decompress(e) => e.code(),
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::Stage(e) => e.code(),
        }
    }
}

/// Orchestrates admission for every upload.
pub struct Ingestor {
    gate: Arc<dyn AdmissionGate>,
    parser: Arc<dyn EncounterParser>,
    stager: Arc<PendingStager>,
    lifecycle: Arc<SummaryLifecycle>,
    queue: WorkQueue,
    max_decompressed_size: u64,
}

impl Ingestor {
    pub fn new(
        gate: Arc<dyn AdmissionGate>,
        parser: Arc<dyn EncounterParser>,
        stager: Arc<PendingStager>,
        lifecycle: Arc<SummaryLifecycle>,
        queue: WorkQueue,
        max_decompressed_size: u64,
    ) -> Self {
        Self {
            gate,
            parser,
            stager,
            lifecycle,
            queue,
            max_decompressed_size,
        }
    }

    /// Admit an upload now.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        self.ingest_at(request, OffsetDateTime::now_utc()).await
    }

    /// Admit an upload as of `now`.
    pub async fn ingest_at(
        &self,
        request: IngestRequest,
        now: OffsetDateTime,
    ) -> Result<IngestOutcome, IngestError> {
        let result = self.admit(request, now).await;
        match &result {
            Ok(IngestOutcome::Accepted { .. }) => metrics::ADMISSIONS_ACCEPTED.inc(),
            Ok(IngestOutcome::Duplicate { .. }) => metrics::ADMISSIONS_DUPLICATE.inc(),
            Err(e) => metrics::record_rejection(e.code()),
        }
        result
    }

    async fn admit(
        &self,
        request: IngestRequest,
        now: OffsetDateTime,
    ) -> Result<IngestOutcome, IngestError> {
        let IngestRequest {
            owner,
            body,
            expected_size,
        } = request;

        if !self.gate.admit(&owner) {
            return Err(IngestError::AdmissionDenied);
        }

        let payload = decompress(&body, expected_size, self.max_decompressed_size).await?;
        drop(body);
        metrics::DECOMPRESSED_BYTES.inc_by(payload.len() as u64);

        let association = self
            .parser
            .fingerprint(&payload)
            .map_err(|e| IngestError::InvalidEnvelope(e.to_string()))?;

        // A queue slot is taken only for a summary about to be created.
        let (staged, slot) = self
            .stager
            .stage_reserving(&association, &owner, now, || {
                self.queue
                    .reserve()
                    .map_err(|_| StageError::QueueUnavailable)
            })
            .await?;
        let Some(slot) = slot else {
            tracing::info!(
                association = %association,
                existing_tracking_id = %staged.tracking_id,
                "duplicate upload rejected"
            );
            return Ok(IngestOutcome::Duplicate {
                existing_tracking_id: staged.tracking_id,
                association,
            });
        };

        let job = ProcessingJob {
            tracking_id: staged.tracking_id,
            association: association.clone(),
            owner,
            payload,
        };
        self.lifecycle.staged(&job);
        slot.submit(job);

        Ok(IngestOutcome::Accepted {
            tracking_id: staged.tracking_id,
            association,
        })
    }
}
