//! Repository traits for metadata operations.

pub mod summaries;

pub use summaries::SummaryRepo;
