//! Application state shared across handlers.

use crate::admission::{self, AdmissionGate};
use crate::events::BroadcastEventSink;
use crate::identity::{HeaderIdentity, IdentityResolver};
use crate::ingest::Ingestor;
use crate::lifecycle::SummaryLifecycle;
use crate::parser::EncounterParser;
use crate::stager::PendingStager;
use crate::worker::{spawn_workers, work_queue};
use logward_core::config::AppConfig;
use logward_metadata::MetadataStore;
use std::sync::Arc;
use std::time::Duration;

/// Buffered events per slow lifecycle subscriber.
const EVENT_BUFFER: usize = 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Summary store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Uploader identity resolution.
    pub identity: Arc<dyn IdentityResolver>,
    /// Admission gate (quota).
    pub gate: Arc<dyn AdmissionGate>,
    /// Pending upload index.
    pub stager: Arc<PendingStager>,
    /// Lifecycle event fan-out.
    pub events: Arc<BroadcastEventSink>,
    /// Admission pipeline.
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    /// Create a new application state and start the processing workers.
    ///
    /// Must be called from within a tokio runtime. Panics if configuration
    /// is invalid.
    ///
    /// # Panics
    ///
    /// Panics if server or admission configuration validation fails.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        parser: Arc<dyn EncounterParser>,
    ) -> Self {
        // Fail fast on errors, log warnings
        match config.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {}", warning);
                }
            }
            Err(error) => {
                panic!("Invalid configuration: {}", error);
            }
        }

        let identity: Arc<dyn IdentityResolver> =
            match HeaderIdentity::new(&config.server.identity_header) {
                Ok(identity) => Arc::new(identity),
                Err(error) => panic!("Invalid configuration: {}", error),
            };
        let gate = admission::from_config(&config.admission);
        let stager = Arc::new(PendingStager::new(
            metadata.clone(),
            config.server.staleness_threshold(),
        ));
        let events = Arc::new(BroadcastEventSink::new(EVENT_BUFFER));
        let lifecycle = Arc::new(SummaryLifecycle::new(
            metadata.clone(),
            stager.clone(),
            events.clone(),
        ));

        let (queue, receiver) = work_queue(config.server.queue_capacity);
        spawn_workers(
            receiver,
            config.server.worker_count,
            parser.clone(),
            lifecycle.clone(),
        );

        let ingestor = Arc::new(Ingestor::new(
            gate.clone(),
            parser,
            stager.clone(),
            lifecycle,
            queue,
            config.server.max_decompressed_size,
        ));

        Self {
            config: Arc::new(config),
            metadata,
            identity,
            gate,
            stager,
            events,
            ingestor,
        }
    }

    /// Get the cleanup interval for the admission quota, if enabled.
    pub fn admission_cleanup_interval(&self) -> Option<Duration> {
        self.config
            .admission
            .enabled
            .then(|| Duration::from_secs(self.config.admission.cleanup_interval_secs))
    }
}
