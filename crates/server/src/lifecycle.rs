//! Summary lifecycle transitions.
//!
//! A summary is created in `processing` by the stager and leaves it exactly
//! once. Completion writes are conditional on the stored state, so a late
//! or repeated completion cannot overwrite a terminal summary. Whatever the
//! outcome of the write, the upload stops being pending.

use crate::events::{EventSink, LifecycleEvent, LifecycleEventKind};
use crate::metrics;
use crate::stager::PendingStager;
use crate::worker::ProcessingJob;
use logward_core::{SummaryOutcome, SummaryStatus};
use logward_metadata::{MetadataError, MetadataResult, MetadataStore};
use std::sync::Arc;
use time::OffsetDateTime;

/// Drives summaries from `processing` to a terminal state.
pub struct SummaryLifecycle {
    metadata: Arc<dyn MetadataStore>,
    stager: Arc<PendingStager>,
    events: Arc<dyn EventSink>,
}

impl SummaryLifecycle {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        stager: Arc<PendingStager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            metadata,
            stager,
            events,
        }
    }

    /// Announce an upload that was staged and handed to the workers.
    pub fn staged(&self, job: &ProcessingJob) {
        self.events
            .emit(event(job, LifecycleEventKind::Staged, None));
    }

    /// Record a successful parse.
    pub async fn succeed(&self, job: &ProcessingJob, outcome: SummaryOutcome) -> MetadataResult<()> {
        let result = self.write_success(job, &outcome).await;
        self.finish(job, SummaryStatus::Success, &result).await;
        if result.is_ok() {
            self.events
                .emit(event(job, LifecycleEventKind::Succeeded, None));
        }
        result
    }

    /// Record a failed parse. Parsed fields are never stored for failures.
    pub async fn fail(&self, job: &ProcessingJob, reason: &str) -> MetadataResult<()> {
        let result = self
            .metadata
            .complete_summary_failure(
                *job.tracking_id.as_uuid(),
                reason,
                OffsetDateTime::now_utc(),
            )
            .await;
        self.finish(job, SummaryStatus::Failed, &result).await;
        if result.is_ok() {
            self.events.emit(event(
                job,
                LifecycleEventKind::Failed,
                Some(reason.to_string()),
            ));
        }
        result
    }

    async fn write_success(
        &self,
        job: &ProcessingJob,
        outcome: &SummaryOutcome,
    ) -> MetadataResult<()> {
        let participants = serde_json::to_string(&outcome.participants)
            .map_err(|e| MetadataError::Internal(e.to_string()))?;
        let duration_ms = i64::try_from(outcome.duration_ms).map_err(|_| {
            MetadataError::Internal(format!("duration {} out of range", outcome.duration_ms))
        })?;
        self.metadata
            .complete_summary_success(
                *job.tracking_id.as_uuid(),
                &participants,
                outcome.boss_id.map(i64::from),
                duration_ms,
                OffsetDateTime::now_utc(),
            )
            .await
    }

    async fn finish(&self, job: &ProcessingJob, status: SummaryStatus, result: &MetadataResult<()>) {
        match result {
            Ok(()) => {
                metrics::SUMMARIES_COMPLETED
                    .with_label_values(&[status.as_str()])
                    .inc();
                tracing::info!(
                    tracking_id = %job.tracking_id,
                    status = %status,
                    "summary completed"
                );
            }
            Err(MetadataError::InvalidStateTransition { from, .. }) => {
                tracing::warn!(
                    tracking_id = %job.tracking_id,
                    current = %from,
                    attempted = %status,
                    "summary already completed, ignoring"
                );
            }
            Err(e) => {
                tracing::error!(
                    tracking_id = %job.tracking_id,
                    status = %status,
                    error = %e,
                    "failed to record summary completion"
                );
            }
        }
        self.stager.release(&job.association, job.tracking_id).await;
    }
}

fn event(job: &ProcessingJob, kind: LifecycleEventKind, detail: Option<String>) -> LifecycleEvent {
    LifecycleEvent {
        kind,
        tracking_id: job.tracking_id,
        association: job.association.clone(),
        owner: job.owner.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastEventSink;
    use bytes::Bytes;
    use logward_core::{Association, OwnerId};
    use logward_metadata::SqliteStore;
    use tempfile::TempDir;
    use time::Duration;

    struct Fixture {
        _temp: TempDir,
        metadata: Arc<dyn MetadataStore>,
        stager: Arc<PendingStager>,
        events: Arc<BroadcastEventSink>,
        lifecycle: SummaryLifecycle,
    }

    async fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(temp.path().join("summaries.db")).await.unwrap());
        let stager = Arc::new(PendingStager::new(metadata.clone(), Duration::minutes(10)));
        let events = Arc::new(BroadcastEventSink::new(16));
        let lifecycle = SummaryLifecycle::new(metadata.clone(), stager.clone(), events.clone());
        Fixture {
            _temp: temp,
            metadata,
            stager,
            events,
            lifecycle,
        }
    }

    async fn staged_job(fixture: &Fixture) -> ProcessingJob {
        let association = Association::build(44, ["p2", "p1"]).unwrap();
        let owner = OwnerId::new("uploader").unwrap();
        let staged = fixture.stager.stage(&association, &owner).await.unwrap();
        ProcessingJob {
            tracking_id: staged.tracking_id,
            association,
            owner,
            payload: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_success_records_outcome_and_releases() {
        let fixture = fixture().await;
        let mut rx = fixture.events.subscribe();
        let job = staged_job(&fixture).await;

        let outcome = SummaryOutcome {
            participants: vec!["p1".to_string(), "p2".to_string()],
            boss_id: Some(7),
            duration_ms: 61_000,
        };
        fixture.lifecycle.succeed(&job, outcome).await.unwrap();

        let row = fixture
            .metadata
            .get_summary(*job.tracking_id.as_uuid())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "success");
        assert_eq!(row.boss_id, Some(7));
        assert_eq!(row.duration_ms, Some(61_000));
        assert!(fixture.stager.lookup(&job.association).await.is_none());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, LifecycleEventKind::Succeeded);
        assert_eq!(event.tracking_id, job.tracking_id);
    }

    #[tokio::test]
    async fn test_failure_keeps_no_parsed_fields() {
        let fixture = fixture().await;
        let job = staged_job(&fixture).await;

        fixture.lifecycle.fail(&job, "truncated event stream").await.unwrap();

        let row = fixture
            .metadata
            .get_summary(*job.tracking_id.as_uuid())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error_detail.as_deref(), Some("truncated event stream"));
        assert!(row.participants.is_none());
        assert!(row.duration_ms.is_none());
        assert_eq!(fixture.stager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let fixture = fixture().await;
        let mut rx = fixture.events.subscribe();
        let job = staged_job(&fixture).await;

        fixture.lifecycle.fail(&job, "first").await.unwrap();
        let late = fixture
            .lifecycle
            .succeed(
                &job,
                SummaryOutcome {
                    participants: vec!["p1".to_string()],
                    boss_id: None,
                    duration_ms: 1,
                },
            )
            .await;
        assert!(matches!(
            late,
            Err(MetadataError::InvalidStateTransition { .. })
        ));

        let row = fixture
            .metadata
            .get_summary(*job.tracking_id.as_uuid())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "failed");

        // Only the successful transition was announced.
        assert_eq!(rx.recv().await.unwrap().kind, LifecycleEventKind::Failed);
        assert!(rx.try_recv().is_err());
    }
}
