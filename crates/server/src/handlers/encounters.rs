//! Encounter upload handlers.

use crate::error::{ApiError, ApiResult};
use crate::identity::require_uploader;
use crate::ingest::{IngestOutcome, IngestRequest};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use logward_core::{EncounterSummary, SummaryId, SummaryStatus};
use serde::Serialize;
use time::OffsetDateTime;

/// Header carrying the client-declared decompressed size.
pub const UNCOMPRESSED_SIZE_HEADER: &str = "x-uncompressed-size";

/// Response for an accepted upload.
#[derive(Debug, Serialize)]
pub struct SubmitEncounterResponse {
    /// Id to poll for the summary.
    pub tracking_id: String,
    /// Deduplication key the upload was filed under.
    pub association_key: String,
}

/// Summary as returned to its uploader.
#[derive(Debug, Serialize)]
pub struct EncounterSummaryResponse {
    pub tracking_id: String,
    pub association_key: String,
    pub zone_id: i32,
    pub status: SummaryStatus,
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boss_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<EncounterSummary> for EncounterSummaryResponse {
    fn from(summary: EncounterSummary) -> Self {
        Self {
            tracking_id: summary.id.to_string(),
            association_key: summary.association.key().to_string(),
            zone_id: summary.association.zone_id(),
            status: summary.status,
            participants: summary.participants,
            boss_id: summary.boss_id,
            duration_ms: summary.duration_ms,
            error_detail: summary.error_detail,
            created_at: summary.created,
            updated_at: summary.updated,
        }
    }
}

fn declared_size(headers: &HeaderMap) -> ApiResult<u64> {
    let value = headers.get(UNCOMPRESSED_SIZE_HEADER).ok_or_else(|| {
        ApiError::BadRequest(format!("missing {UNCOMPRESSED_SIZE_HEADER} header"))
    })?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "{UNCOMPRESSED_SIZE_HEADER} must be a non-negative integer"
            ))
        })
}

/// POST /v1/encounters - Submit a compressed encounter log.
#[tracing::instrument(skip(state, req), fields(owner, tracking_id, association))]
pub async fn submit_encounter(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<SubmitEncounterResponse>)> {
    let owner = require_uploader(&req)?.clone();
    tracing::Span::current().record("owner", owner.as_str());
    let expected_size = declared_size(req.headers())?;

    let limit = usize::try_from(state.config.server.max_compressed_size).unwrap_or(usize::MAX);
    let body = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;

    let outcome = state
        .ingestor
        .ingest(IngestRequest {
            owner,
            body,
            expected_size,
        })
        .await?;

    match outcome {
        IngestOutcome::Accepted {
            tracking_id,
            association,
        } => {
            let span = tracing::Span::current();
            span.record("tracking_id", tracing::field::display(tracking_id));
            span.record("association", association.key());
            tracing::info!("encounter accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(SubmitEncounterResponse {
                    tracking_id: tracking_id.to_string(),
                    association_key: association.key().to_string(),
                }),
            ))
        }
        IngestOutcome::Duplicate {
            existing_tracking_id,
            ..
        } => Err(ApiError::DuplicatePending {
            existing_tracking_id,
        }),
    }
}

/// GET /v1/encounters/{tracking_id} - Poll an upload's summary.
///
/// Summaries are only visible to their uploader; anyone else gets 404.
#[tracing::instrument(skip(state, req))]
pub async fn get_encounter(
    State(state): State<AppState>,
    Path(tracking_id): Path<String>,
    req: Request,
) -> ApiResult<Json<EncounterSummaryResponse>> {
    let owner = require_uploader(&req)?;
    let tracking_id = SummaryId::parse(&tracking_id)?;

    let row = state
        .metadata
        .get_summary(*tracking_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound("encounter not found".to_string()))?;
    let summary = EncounterSummary::try_from(row)?;

    if &summary.owner != owner {
        return Err(ApiError::NotFound("encounter not found".to_string()));
    }

    Ok(Json(summary.into()))
}
