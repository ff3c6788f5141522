//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid association: {0}")]
    InvalidAssociation(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid tracking id: {0}")]
    InvalidTrackingId(String),

    #[error("invalid owner: {0}")]
    InvalidOwner(String),

    #[error("invalid summary status: {0}")]
    InvalidStatus(String),
}

impl Error {
    /// Get the machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAssociation(_) => "invalid_association",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::InvalidTrackingId(_) => "invalid_tracking_id",
            Self::InvalidOwner(_) => "invalid_owner",
            Self::InvalidStatus(_) => "invalid_status",
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
