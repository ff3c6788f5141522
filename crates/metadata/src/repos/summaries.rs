//! Encounter summary repository.

use crate::error::MetadataResult;
use crate::models::SummaryRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for encounter summary operations.
#[async_trait]
pub trait SummaryRepo: Send + Sync {
    /// Insert a new summary. Fails with `AlreadyExists` on an id collision.
    async fn create_summary(&self, summary: &SummaryRow) -> MetadataResult<()>;

    /// Get a summary by ID.
    async fn get_summary(&self, summary_id: Uuid) -> MetadataResult<Option<SummaryRow>>;

    /// Most recently created summary for an association key, of any status.
    async fn latest_summary_for_association(
        &self,
        association_key: &str,
    ) -> MetadataResult<Option<SummaryRow>>;

    /// Move a processing summary to `success` and record its parsed fields.
    ///
    /// Returns `InvalidStateTransition` if the summary already left
    /// `processing`, and `NotFound` if it does not exist.
    async fn complete_summary_success(
        &self,
        summary_id: Uuid,
        participants_json: &str,
        boss_id: Option<i64>,
        duration_ms: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Move a processing summary to `failed` with an error detail.
    ///
    /// Same preconditions as [`SummaryRepo::complete_summary_success`].
    async fn complete_summary_failure(
        &self,
        summary_id: Uuid,
        error_detail: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Fail every summary still in `processing`. Used at startup, when no
    /// worker can complete them anymore. Returns the number of rows changed.
    async fn fail_processing_summaries(
        &self,
        error_detail: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Count summaries in the given state.
    async fn count_summaries_by_status(&self, status: &str) -> MetadataResult<u64>;
}
