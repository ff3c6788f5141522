//! Lifecycle notifications.
//!
//! Every summary transition produces one [`LifecycleEvent`]. Delivery is
//! best effort: a sink must never block or fail the transition that
//! produced the event.

use logward_core::{Association, OwnerId, SummaryId, SummaryStatus};
use serde::Serialize;
use tokio::sync::broadcast;

/// What happened to an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Accepted and queued for processing.
    Staged,
    /// Summary written.
    Succeeded,
    /// Processing failed.
    Failed,
}

impl LifecycleEventKind {
    /// Summary status after this event.
    pub fn status(&self) -> SummaryStatus {
        match self {
            Self::Staged => SummaryStatus::Processing,
            Self::Succeeded => SummaryStatus::Success,
            Self::Failed => SummaryStatus::Failed,
        }
    }
}

/// Notification of a summary transition.
#[derive(Clone, Debug, Serialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub tracking_id: SummaryId,
    pub association: Association,
    pub owner: OwnerId,
    /// Failure reason for `Failed` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Receives lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Sink that logs every event and fans it out to in-process subscribers.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastEventSink {
    /// Create a sink that buffers up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: LifecycleEvent) {
        tracing::info!(
            kind = ?event.kind,
            tracking_id = %event.tracking_id,
            association = %event.association,
            owner = %event.owner,
            detail = event.detail.as_deref().unwrap_or(""),
            "summary lifecycle event"
        );
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
