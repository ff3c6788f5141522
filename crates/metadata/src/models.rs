//! Database models mapping to the summary schema.

use crate::error::{MetadataError, MetadataResult};
use logward_core::{Association, EncounterSummary, OwnerId, SummaryId, SummaryStatus};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Encounter summary record.
#[derive(Debug, Clone, FromRow)]
pub struct SummaryRow {
    pub summary_id: Uuid,
    pub association_key: String,
    pub zone_id: i64,
    pub owner_id: String,
    /// JSON array of participant ids; set once the summary succeeds.
    pub participants: Option<String>,
    pub boss_id: Option<i64>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub error_detail: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SummaryRow {
    /// Build the row for a new summary.
    pub fn from_summary(summary: &EncounterSummary) -> MetadataResult<Self> {
        let participants = if summary.participants.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&summary.participants)
                    .map_err(|e| MetadataError::Internal(e.to_string()))?,
            )
        };
        let duration_ms = summary
            .duration_ms
            .map(|d| {
                i64::try_from(d)
                    .map_err(|_| MetadataError::Internal(format!("duration {d} out of range")))
            })
            .transpose()?;

        Ok(Self {
            summary_id: *summary.id.as_uuid(),
            association_key: summary.association.key().to_string(),
            zone_id: i64::from(summary.association.zone_id()),
            owner_id: summary.owner.as_str().to_string(),
            participants,
            boss_id: summary.boss_id.map(i64::from),
            duration_ms,
            status: summary.status.as_str().to_string(),
            error_detail: summary.error_detail.clone(),
            created_at: summary.created,
            updated_at: summary.updated,
        })
    }
}

impl TryFrom<SummaryRow> for EncounterSummary {
    type Error = MetadataError;

    fn try_from(row: SummaryRow) -> MetadataResult<Self> {
        let association = Association::parse(&row.association_key)?;
        if i64::from(association.zone_id()) != row.zone_id {
            return Err(MetadataError::Corrupt(format!(
                "summary {} zone {} disagrees with association {}",
                row.summary_id, row.zone_id, row.association_key
            )));
        }
        let participants = match row.participants.as_deref() {
            Some(json) => serde_json::from_str(json).map_err(|e| {
                MetadataError::Corrupt(format!("summary {} participants: {e}", row.summary_id))
            })?,
            None => Vec::new(),
        };
        let boss_id = row
            .boss_id
            .map(|b| {
                u32::try_from(b).map_err(|_| {
                    MetadataError::Corrupt(format!("summary {} boss id {b}", row.summary_id))
                })
            })
            .transpose()?;
        let duration_ms = row
            .duration_ms
            .map(|d| {
                u64::try_from(d).map_err(|_| {
                    MetadataError::Corrupt(format!("summary {} duration {d}", row.summary_id))
                })
            })
            .transpose()?;

        Ok(EncounterSummary {
            id: SummaryId::from_uuid(row.summary_id),
            association,
            owner: OwnerId::new(row.owner_id)?,
            participants,
            boss_id,
            duration_ms,
            status: SummaryStatus::parse(&row.status)?,
            error_detail: row.error_detail,
            created: row.created_at,
            updated: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> EncounterSummary {
        let mut summary = EncounterSummary::processing(
            SummaryId::new(),
            Association::build(77, ["b", "a"]).unwrap(),
            OwnerId::new("owner-1").unwrap(),
            OffsetDateTime::now_utc(),
        );
        summary.status = SummaryStatus::Success;
        summary.participants = vec!["a".to_string(), "b".to_string()];
        summary.boss_id = Some(12);
        summary.duration_ms = Some(90_000);
        summary
    }

    #[test]
    fn test_row_conversion_preserves_fields() {
        let original = summary();
        let row = SummaryRow::from_summary(&original).unwrap();
        assert_eq!(row.association_key, "a,b|77");
        assert_eq!(row.participants.as_deref(), Some(r#"["a","b"]"#));

        let back = EncounterSummary::try_from(row).unwrap();
        assert_eq!(back.id, original.id);
        assert_eq!(back.association, original.association);
        assert_eq!(back.participants, original.participants);
        assert_eq!(back.boss_id, Some(12));
        assert_eq!(back.duration_ms, Some(90_000));
        assert_eq!(back.status, SummaryStatus::Success);
    }

    #[test]
    fn test_corrupt_rows_are_rejected() {
        let mut row = SummaryRow::from_summary(&summary()).unwrap();
        row.status = "archived".to_string();
        assert!(matches!(
            EncounterSummary::try_from(row),
            Err(MetadataError::Corrupt(_))
        ));

        let mut row = SummaryRow::from_summary(&summary()).unwrap();
        row.zone_id = 78;
        assert!(EncounterSummary::try_from(row).is_err());

        let mut row = SummaryRow::from_summary(&summary()).unwrap();
        row.boss_id = Some(-1);
        assert!(EncounterSummary::try_from(row).is_err());
    }
}
