//! Encounter log parsing seam.
//!
//! Admission needs only the fingerprint; the background worker needs the
//! full summary. Both go through [`EncounterParser`] so deployments can
//! swap in a richer parser without touching the pipeline.

use logward_core::{Association, EnvelopeHeader, SummaryOutcome};

/// Extracts what the pipeline needs from a decompressed payload.
pub trait EncounterParser: Send + Sync {
    /// Identify the encounter. Runs on the request path and must be cheap.
    fn fingerprint(&self, payload: &[u8]) -> logward_core::Result<Association>;

    /// Produce the summary fields. Runs on a worker and may be slow.
    fn summarize(&self, payload: &[u8]) -> logward_core::Result<SummaryOutcome>;
}

/// Parser for the fixed encounter envelope header.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeParser;

impl EncounterParser for EnvelopeParser {
    fn fingerprint(&self, payload: &[u8]) -> logward_core::Result<Association> {
        EnvelopeHeader::decode(payload)?.association()
    }

    fn summarize(&self, payload: &[u8]) -> logward_core::Result<SummaryOutcome> {
        let header = EnvelopeHeader::decode(payload)?;
        let association = header.association()?;
        Ok(SummaryOutcome {
            participants: association.participants().map(str::to_string).collect(),
            boss_id: header.boss(),
            duration_ms: header.duration_ms()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(started: i64, ended: i64) -> Vec<u8> {
        let header = EnvelopeHeader {
            zone_id: 9,
            boss_id: 0,
            started_at_ms: started,
            ended_at_ms: ended,
            participants: vec!["z".to_string(), "a".to_string(), "z".to_string()],
        };
        let mut bytes = header.encode().unwrap().to_vec();
        bytes.extend_from_slice(&[0xde, 0xad]);
        bytes
    }

    #[test]
    fn test_fingerprint_and_summary() {
        let parser = EnvelopeParser;
        let bytes = payload(1_000, 4_500);

        assert_eq!(parser.fingerprint(&bytes).unwrap().key(), "a,z|9");

        let outcome = parser.summarize(&bytes).unwrap();
        assert_eq!(outcome.participants, vec!["a", "z"]);
        assert_eq!(outcome.boss_id, None);
        assert_eq!(outcome.duration_ms, 3_500);
    }

    #[test]
    fn test_summary_rejects_inverted_timing() {
        let parser = EnvelopeParser;
        let bytes = payload(5_000, 1_000);
        // Fingerprinting only needs structure.
        assert!(parser.fingerprint(&bytes).is_ok());
        assert!(parser.summarize(&bytes).is_err());
    }
}
