//! Encounter summary types and lifecycle.

use crate::association::Association;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Tracking id handed to clients for a staged upload.
///
/// The same id names the durable summary record the upload produces.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryId(Uuid);

impl SummaryId {
    /// Generate a new random summary ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidTrackingId(format!("{s:?}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SummaryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SummaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SummaryId({})", self.0)
    }
}

impl fmt::Display for SummaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maximum accepted owner identifier length.
const MAX_OWNER_LEN: usize = 256;

/// Identity of the uploader, as resolved by the authentication layer.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(crate::Error::InvalidOwner(
                "owner id cannot be empty".to_string(),
            ));
        }
        if value.len() > MAX_OWNER_LEN {
            return Err(crate::Error::InvalidOwner(format!(
                "owner id exceeds {MAX_OWNER_LEN} bytes"
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(crate::Error::InvalidOwner(
                "owner id contains control characters".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

/// Summary processing state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    /// Upload accepted and waiting on (or undergoing) background processing.
    Processing,
    /// Background processing produced a summary.
    Success,
    /// Background processing failed; only the error detail is kept.
    Failed,
}

impl SummaryStatus {
    /// Parse from the stored string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(crate::Error::InvalidStatus(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Check if the summary reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Terminal states have no outgoing transitions.
    pub fn can_transition_to(&self, next: SummaryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Processing, Self::Success) | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields filled in by a successful background parse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    /// Participants in canonical order.
    pub participants: Vec<String>,
    /// Boss encountered, if the fight had one.
    pub boss_id: Option<u32>,
    /// Encounter duration in milliseconds.
    pub duration_ms: u64,
}

/// Durable record describing one accepted upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncounterSummary {
    pub id: SummaryId,
    pub association: Association,
    pub owner: OwnerId,
    /// Empty until the summary succeeds.
    pub participants: Vec<String>,
    pub boss_id: Option<u32>,
    pub duration_ms: Option<u64>,
    pub status: SummaryStatus,
    /// Failure reason, set only for failed summaries.
    pub error_detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

impl EncounterSummary {
    /// Create a new summary in the processing state.
    pub fn processing(
        id: SummaryId,
        association: Association,
        owner: OwnerId,
        created: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            association,
            owner,
            participants: Vec::new(),
            boss_id: None,
            duration_ms: None,
            status: SummaryStatus::Processing,
            error_detail: None,
            created,
            updated: created,
        }
    }

    /// Age of the record relative to `now`.
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_id_roundtrip() {
        let id = SummaryId::new();
        let parsed = SummaryId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.as_uuid(), parsed.as_uuid());
        assert!(SummaryId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_owner_validation() {
        assert!(OwnerId::new("user-17").is_ok());
        assert!(OwnerId::new("").is_err());
        assert!(OwnerId::new("   ").is_err());
        assert!(OwnerId::new("a\nb").is_err());
        assert!(OwnerId::new("x".repeat(MAX_OWNER_LEN + 1)).is_err());
    }

    #[test]
    fn test_status_transitions() {
        use SummaryStatus::*;
        assert!(Processing.can_transition_to(Success));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Processing));
        for terminal in [Success, Failed] {
            assert!(terminal.is_terminal());
            for next in [Processing, Success, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn test_status_parse() {
        for status in [
            SummaryStatus::Processing,
            SummaryStatus::Success,
            SummaryStatus::Failed,
        ] {
            assert_eq!(SummaryStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SummaryStatus::parse("PROCESSING").is_err());
    }

    #[test]
    fn test_new_summary_is_processing() {
        let now = OffsetDateTime::now_utc();
        let summary = EncounterSummary::processing(
            SummaryId::new(),
            Association::build(5, ["a"]).unwrap(),
            OwnerId::new("owner").unwrap(),
            now,
        );
        assert_eq!(summary.status, SummaryStatus::Processing);
        assert!(summary.participants.is_empty());
        assert_eq!(summary.age(now + time::Duration::seconds(3)).whole_seconds(), 3);
    }
}
