//! HTTP ingestion service for compressed combat-log uploads.
//!
//! This crate provides:
//! - Bounded decompression and envelope fingerprinting of uploads
//! - Atomic deduplication of concurrent uploads of the same encounter
//! - Background summary processing with a PROCESSING/SUCCESS/FAILED lifecycle
//! - Per-uploader admission quotas

pub mod admission;
pub mod error;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod parser;
pub mod routes;
pub mod stager;
pub mod state;
pub mod worker;

pub use error::ApiError;
pub use identity::TraceId;
pub use ingest::{IngestOutcome, IngestRequest, Ingestor};
pub use routes::create_router;
pub use state::AppState;
