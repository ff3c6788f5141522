//! Core domain types and shared logic for combat log ingestion.
//!
//! This crate defines the data model used across all other crates:
//! - Association fingerprints used to deduplicate uploads
//! - The encounter log envelope
//! - Bounded gzip decompression of untrusted payloads
//! - Encounter summaries and their lifecycle states
//! - Configuration

pub mod association;
pub mod config;
pub mod decompress;
pub mod envelope;
pub mod error;
pub mod summary;

pub use association::Association;
pub use decompress::{DecompressError, decompress};
pub use envelope::EnvelopeHeader;
pub use error::{Error, Result};
pub use summary::{EncounterSummary, OwnerId, SummaryId, SummaryOutcome, SummaryStatus};

/// Default cap on decompressed payload size: 64 MiB
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024 * 1024;

/// Default cap on compressed request body size: 16 MiB
pub const DEFAULT_MAX_COMPRESSED_SIZE: u64 = 16 * 1024 * 1024;

/// Default pending-upload staleness threshold: 10 minutes
pub const DEFAULT_STALENESS_SECS: u64 = 600;
