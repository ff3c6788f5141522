//! Pending upload index.
//!
//! The stager is the only writer of in-flight admission state. Each
//! association owns one slot guarded by an async mutex; the whole
//! check-and-create (pending index lookup, store lookup, summary insert)
//! runs while that slot is held, so admissions for one association are
//! totally ordered and at most one of any set of racing uploads is created.
//! Different associations never contend.
//!
//! An upload blocks resubmission of the same encounter while it is younger
//! than the staleness threshold. This holds for in-flight entries and for
//! stored summaries of any status. Older attempts are treated as abandoned
//! and superseded by the next upload.

use crate::metrics;
use dashmap::DashMap;
use logward_core::{Association, EncounterSummary, OwnerId, SummaryId};
use logward_metadata::{MetadataStore, SummaryRow};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

/// In-flight upload awaiting its lifecycle completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub tracking_id: SummaryId,
    pub owner: OwnerId,
    pub created: OffsetDateTime,
}

impl PendingEntry {
    fn is_fresh(&self, now: OffsetDateTime, staleness: Duration) -> bool {
        now - self.created < staleness
    }
}

/// Result of a staging attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageResult {
    /// New tracking id when `created`, otherwise the blocking upload's id.
    pub tracking_id: SummaryId,
    /// Whether a new processing summary was created.
    pub created: bool,
    /// Stale in-flight upload replaced by this one, if any.
    pub superseded: Option<SummaryId>,
}

/// Staging failures. Nothing is recorded when staging fails.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to record summary: {0}")]
    StoreWriteFailed(String),

    #[error("summary store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("processing queue unavailable")]
    QueueUnavailable,
}

impl StageError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreWriteFailed(_) => "store_write_failed",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::QueueUnavailable => "queue_unavailable",
        }
    }
}

type Slot = Arc<Mutex<Option<PendingEntry>>>;

/// Atomic check-and-create over pending uploads and recent summaries.
pub struct PendingStager {
    slots: DashMap<Association, Slot>,
    metadata: Arc<dyn MetadataStore>,
    staleness: Duration,
    pending: AtomicUsize,
}

impl PendingStager {
    pub fn new(metadata: Arc<dyn MetadataStore>, staleness: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            metadata,
            staleness,
            pending: AtomicUsize::new(0),
        }
    }

    /// Staleness threshold this stager applies.
    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Stage an upload at the current time.
    pub async fn stage(
        &self,
        association: &Association,
        owner: &OwnerId,
    ) -> Result<StageResult, StageError> {
        self.stage_at(association, owner, OffsetDateTime::now_utc())
            .await
    }

    /// Stage an upload as of `now`.
    pub async fn stage_at(
        &self,
        association: &Association,
        owner: &OwnerId,
        now: OffsetDateTime,
    ) -> Result<StageResult, StageError> {
        self.stage_reserving(association, owner, now, || Ok(()))
            .await
            .map(|(result, _)| result)
    }

    /// Stage an upload as of `now`, calling `reserve` under the slot lock
    /// right before a new summary would be created.
    ///
    /// Duplicates never call `reserve`, so they are answered the same way
    /// regardless of downstream capacity. The reservation is returned exactly
    /// when a summary was created; if `reserve` fails nothing is recorded.
    pub async fn stage_reserving<R>(
        &self,
        association: &Association,
        owner: &OwnerId,
        now: OffsetDateTime,
        reserve: impl FnOnce() -> Result<R, StageError>,
    ) -> Result<(StageResult, Option<R>), StageError> {
        // The map guard is released at the end of this statement; only the
        // slot lock is held across awaits.
        let slot = self
            .slots
            .entry(association.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let result = {
            let mut guard = slot.lock().await;
            self.decide(&mut guard, association, owner, now, reserve)
                .await
        };

        drop(slot);
        self.discard_if_idle(association);
        result
    }

    async fn decide<R>(
        &self,
        entry: &mut Option<PendingEntry>,
        association: &Association,
        owner: &OwnerId,
        now: OffsetDateTime,
        reserve: impl FnOnce() -> Result<R, StageError>,
    ) -> Result<(StageResult, Option<R>), StageError> {
        let stale = match entry.as_ref() {
            Some(existing) if existing.is_fresh(now, self.staleness) => {
                return Ok((duplicate(existing.tracking_id), None));
            }
            Some(existing) => Some(existing.tracking_id),
            None => None,
        };

        let latest = self
            .metadata
            .latest_summary_for_association(association.key())
            .await
            .map_err(|e| StageError::StoreUnavailable(e.to_string()))?;
        if let Some(row) = latest
            && now - row.created_at < self.staleness
        {
            return Ok((duplicate(SummaryId::from_uuid(row.summary_id)), None));
        }

        let reservation = reserve()?;

        if let Some(stale_tracking_id) = stale {
            tracing::info!(
                association = %association,
                stale_tracking_id = %stale_tracking_id,
                "superseding stale pending upload"
            );
            self.clear(entry);
            metrics::ADMISSIONS_SUPERSEDED.inc();
        }

        let tracking_id = SummaryId::new();
        let summary =
            EncounterSummary::processing(tracking_id, association.clone(), owner.clone(), now);
        let row = SummaryRow::from_summary(&summary)
            .map_err(|e| StageError::StoreWriteFailed(e.to_string()))?;
        self.metadata
            .create_summary(&row)
            .await
            .map_err(|e| StageError::StoreWriteFailed(e.to_string()))?;

        *entry = Some(PendingEntry {
            tracking_id,
            owner: owner.clone(),
            created: now,
        });
        self.pending.fetch_add(1, Ordering::Relaxed);
        metrics::PENDING_UPLOADS.inc();

        Ok((
            StageResult {
                tracking_id,
                created: true,
                superseded: stale,
            },
            Some(reservation),
        ))
    }

    /// Remove the pending entry for `association` if it still belongs to
    /// `tracking_id`. Returns whether an entry was removed.
    pub async fn release(&self, association: &Association, tracking_id: SummaryId) -> bool {
        let Some(slot) = self.slots.get(association).map(|s| s.value().clone()) else {
            return false;
        };

        let released = {
            let mut guard = slot.lock().await;
            let owned = guard
                .as_ref()
                .is_some_and(|entry| entry.tracking_id == tracking_id);
            if owned {
                self.clear(&mut guard);
            }
            owned
        };

        drop(slot);
        self.discard_if_idle(association);
        released
    }

    /// Current pending entry for `association`, if any.
    pub async fn lookup(&self, association: &Association) -> Option<PendingEntry> {
        self.lookup_at(association, OffsetDateTime::now_utc()).await
    }

    /// Pending entry for `association` as of `now`. A stale entry is evicted
    /// instead of returned.
    pub async fn lookup_at(
        &self,
        association: &Association,
        now: OffsetDateTime,
    ) -> Option<PendingEntry> {
        let slot = self.slots.get(association).map(|s| s.value().clone())?;

        let entry = {
            let mut guard = slot.lock().await;
            if guard
                .as_ref()
                .is_some_and(|entry| !entry.is_fresh(now, self.staleness))
            {
                self.clear(&mut guard);
                metrics::PENDING_EVICTIONS.inc();
            }
            guard.clone()
        };

        drop(slot);
        self.discard_if_idle(association);
        entry
    }

    /// Drop pending entries older than the staleness threshold.
    ///
    /// Slots that are mid-decision are skipped; they are revisited on the
    /// next sweep. Returns the number of entries removed.
    pub fn evict_stale(&self, now: OffsetDateTime) -> usize {
        let keys: Vec<Association> = self.slots.iter().map(|s| s.key().clone()).collect();
        let mut evicted = 0;

        for key in keys {
            let Some(slot) = self.slots.get(&key).map(|s| s.value().clone()) else {
                continue;
            };
            if let Ok(mut guard) = slot.try_lock()
                && guard
                    .as_ref()
                    .is_some_and(|entry| !entry.is_fresh(now, self.staleness))
            {
                self.clear(&mut guard);
                evicted += 1;
            }
            drop(slot);
            self.discard_if_idle(&key);
        }

        if evicted > 0 {
            metrics::PENDING_EVICTIONS.inc_by(evicted as u64);
        }
        evicted
    }

    /// Number of uploads currently pending.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn clear(&self, entry: &mut Option<PendingEntry>) {
        if entry.take().is_some() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            metrics::PENDING_UPLOADS.dec();
        }
    }

    /// Remove an empty slot nobody else holds.
    fn discard_if_idle(&self, association: &Association) {
        self.slots.remove_if(association, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|entry| entry.is_none())
        });
    }
}

fn duplicate(tracking_id: SummaryId) -> StageResult {
    StageResult {
        tracking_id,
        created: false,
        superseded: None,
    }
}

/// Spawn a background task that periodically evicts stale pending entries.
pub fn spawn_sweep_task(
    stager: Arc<PendingStager>,
    interval: StdDuration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = stager.evict_stale(OffsetDateTime::now_utc());
            if evicted > 0 {
                tracing::info!(evicted = evicted, "evicted stale pending uploads");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use logward_core::SummaryStatus;
    use logward_metadata::SqliteStore;
    use tempfile::TempDir;

    async fn build_stager(staleness: Duration) -> (TempDir, Arc<dyn MetadataStore>, PendingStager) {
        let temp = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(temp.path().join("summaries.db")).await.unwrap());
        let stager = PendingStager::new(metadata.clone(), staleness);
        (temp, metadata, stager)
    }

    fn association() -> Association {
        Association::build(1001, ["tank", "healer", "dps"]).unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::new("uploader").unwrap()
    }

    #[tokio::test]
    async fn test_first_stage_creates_processing_summary() {
        let (_temp, metadata, stager) = build_stager(Duration::minutes(10)).await;

        let result = stager.stage(&association(), &owner()).await.unwrap();
        assert!(result.created);
        assert!(result.superseded.is_none());
        assert_eq!(stager.pending_count(), 1);

        let row = metadata
            .get_summary(*result.tracking_id.as_uuid())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, SummaryStatus::Processing.as_str());
        assert_eq!(row.association_key, association().key());
    }

    #[tokio::test]
    async fn test_fresh_entry_is_duplicate() {
        let (_temp, _metadata, stager) = build_stager(Duration::minutes(10)).await;
        let now = OffsetDateTime::now_utc();

        let first = stager.stage_at(&association(), &owner(), now).await.unwrap();
        let other_owner = OwnerId::new("someone-else").unwrap();
        let second = stager
            .stage_at(&association(), &other_owner, now + Duration::minutes(9))
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.tracking_id, first.tracking_id);
        assert_eq!(stager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_superseded() {
        let (_temp, metadata, stager) = build_stager(Duration::minutes(10)).await;
        let now = OffsetDateTime::now_utc();

        let first = stager.stage_at(&association(), &owner(), now).await.unwrap();
        // Exactly at the threshold counts as stale.
        let second = stager
            .stage_at(&association(), &owner(), now + Duration::minutes(10))
            .await
            .unwrap();

        assert!(second.created);
        assert_ne!(second.tracking_id, first.tracking_id);
        assert_eq!(second.superseded, Some(first.tracking_id));
        assert_eq!(stager.pending_count(), 1);

        // The abandoned summary is left as it was.
        let old = metadata
            .get_summary(*first.tracking_id.as_uuid())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.status, SummaryStatus::Processing.as_str());
    }

    #[tokio::test]
    async fn test_recent_completed_summary_blocks() {
        let (_temp, metadata, stager) = build_stager(Duration::minutes(10)).await;
        let now = OffsetDateTime::now_utc();

        let first = stager.stage_at(&association(), &owner(), now).await.unwrap();
        metadata
            .complete_summary_failure(*first.tracking_id.as_uuid(), "bad log", now)
            .await
            .unwrap();
        assert!(stager.release(&association(), first.tracking_id).await);
        assert_eq!(stager.pending_count(), 0);

        let second = stager
            .stage_at(&association(), &owner(), now + Duration::minutes(1))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.tracking_id, first.tracking_id);

        let third = stager
            .stage_at(&association(), &owner(), now + Duration::minutes(11))
            .await
            .unwrap();
        assert!(third.created);
        assert!(third.superseded.is_none());
    }

    #[tokio::test]
    async fn test_release_requires_matching_id() {
        let (_temp, _metadata, stager) = build_stager(Duration::minutes(10)).await;

        let staged = stager.stage(&association(), &owner()).await.unwrap();
        assert!(!stager.release(&association(), SummaryId::new()).await);
        assert!(stager.lookup(&association()).await.is_some());

        assert!(stager.release(&association(), staged.tracking_id).await);
        assert!(stager.lookup(&association()).await.is_none());
        assert!(!stager.release(&association(), staged.tracking_id).await);
    }

    #[tokio::test]
    async fn test_evict_stale_entries() {
        let (_temp, _metadata, stager) = build_stager(Duration::seconds(30)).await;
        let now = OffsetDateTime::now_utc();
        let fresh = Association::build(1, ["a"]).unwrap();
        let stale = Association::build(2, ["a"]).unwrap();

        stager.stage_at(&stale, &owner(), now).await.unwrap();
        stager
            .stage_at(&fresh, &owner(), now + Duration::seconds(20))
            .await
            .unwrap();

        assert_eq!(stager.evict_stale(now + Duration::seconds(40)), 1);
        assert!(stager.lookup(&stale).await.is_none());
        assert!(stager.lookup(&fresh).await.is_some());
        assert_eq!(stager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_evicts_stale_entry() {
        let (_temp, _metadata, stager) = build_stager(Duration::seconds(30)).await;
        let now = OffsetDateTime::now_utc();

        let staged = stager.stage_at(&association(), &owner(), now).await.unwrap();
        let found = stager
            .lookup_at(&association(), now + Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(found.tracking_id, staged.tracking_id);

        assert!(
            stager
                .lookup_at(&association(), now + Duration::seconds(30))
                .await
                .is_none()
        );
        assert_eq!(stager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_skips_reservation() {
        let (_temp, _metadata, stager) = build_stager(Duration::minutes(10)).await;
        let now = OffsetDateTime::now_utc();

        let (first, reservation) = stager
            .stage_reserving(&association(), &owner(), now, || Ok("slot"))
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(reservation, Some("slot"));

        // Reservation would fail, but a duplicate never asks for one.
        let (second, reservation) = stager
            .stage_reserving(&association(), &owner(), now, || {
                Err::<(), _>(StageError::QueueUnavailable)
            })
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.tracking_id, first.tracking_id);
        assert!(reservation.is_none());
    }

    #[tokio::test]
    async fn test_failed_reservation_records_nothing() {
        let (_temp, metadata, stager) = build_stager(Duration::minutes(10)).await;

        let err = stager
            .stage_reserving(&association(), &owner(), OffsetDateTime::now_utc(), || {
                Err::<(), _>(StageError::QueueUnavailable)
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "queue_unavailable");
        assert_eq!(stager.pending_count(), 0);
        assert!(
            metadata
                .latest_summary_for_association(association().key())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_distinct_associations_do_not_collide() {
        let (_temp, _metadata, stager) = build_stager(Duration::minutes(10)).await;

        let a = stager
            .stage(&Association::build(1, ["x"]).unwrap(), &owner())
            .await
            .unwrap();
        let b = stager
            .stage(&Association::build(2, ["x"]).unwrap(), &owner())
            .await
            .unwrap();
        assert!(a.created && b.created);
        assert_ne!(a.tracking_id, b.tracking_id);
    }
}
