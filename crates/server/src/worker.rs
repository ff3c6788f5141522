//! Background summarization workers.
//!
//! Admission hands each created upload to a bounded queue; a fixed pool of
//! workers drains it, parses the payload on the blocking pool and completes
//! the summary lifecycle. Request handlers never wait on parsing.

use crate::lifecycle::SummaryLifecycle;
use crate::metrics;
use crate::parser::EncounterParser;
use bytes::Bytes;
use logward_core::{Association, OwnerId, SummaryId};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// One staged upload awaiting summarization.
#[derive(Clone, Debug)]
pub struct ProcessingJob {
    pub tracking_id: SummaryId,
    pub association: Association,
    pub owner: OwnerId,
    /// Decompressed payload.
    pub payload: Bytes,
}

/// The queue is full or no worker is running.
#[derive(Debug, thiserror::Error)]
#[error("processing queue unavailable")]
pub struct QueueUnavailable;

/// Producer side of the processing queue.
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<ProcessingJob>,
}

/// A reserved place in the queue. Dropping it gives the place back.
pub struct QueueSlot<'a> {
    permit: mpsc::Permit<'a, ProcessingJob>,
}

impl WorkQueue {
    /// Reserve room for one job without waiting.
    pub fn reserve(&self) -> Result<QueueSlot<'_>, QueueUnavailable> {
        self.sender
            .try_reserve()
            .map(|permit| QueueSlot { permit })
            .map_err(|_| QueueUnavailable)
    }

    /// Jobs that can be queued right now.
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

impl QueueSlot<'_> {
    pub fn submit(self, job: ProcessingJob) {
        self.permit.send(job);
    }
}

/// Create the processing queue with room for `capacity` jobs.
pub fn work_queue(capacity: usize) -> (WorkQueue, mpsc::Receiver<ProcessingJob>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (WorkQueue { sender }, receiver)
}

/// Start `count` workers draining `receiver`.
pub fn spawn_workers(
    receiver: mpsc::Receiver<ProcessingJob>,
    count: usize,
    parser: Arc<dyn EncounterParser>,
    lifecycle: Arc<SummaryLifecycle>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));

    (0..count.max(1))
        .map(|worker| {
            let receiver = receiver.clone();
            let parser = parser.clone();
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                loop {
                    // Hold the receiver only while waiting for the next job.
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else {
                        tracing::debug!(worker = worker, "processing queue closed, worker exiting");
                        break;
                    };
                    process(job, &parser, &lifecycle).await;
                }
            })
        })
        .collect()
}

async fn process(
    job: ProcessingJob,
    parser: &Arc<dyn EncounterParser>,
    lifecycle: &SummaryLifecycle,
) {
    let timer = metrics::PROCESSING_DURATION.start_timer();
    let parser = parser.clone();
    let payload = job.payload.clone();
    let parsed = tokio::task::spawn_blocking(move || parser.summarize(&payload)).await;
    timer.observe_duration();

    let completed = match parsed {
        Ok(Ok(outcome)) => lifecycle.succeed(&job, outcome).await,
        Ok(Err(e)) => {
            tracing::info!(tracking_id = %job.tracking_id, error = %e, "encounter log rejected");
            lifecycle.fail(&job, &e.to_string()).await
        }
        Err(e) => {
            tracing::error!(tracking_id = %job.tracking_id, error = %e, "parser task failed");
            lifecycle.fail(&job, "encounter parser crashed").await
        }
    };
    // The lifecycle already reported the failure with full context.
    if let Err(e) = completed {
        tracing::debug!(
            tracking_id = %job.tracking_id,
            error = %e,
            "summary completion not recorded"
        );
    }
}
