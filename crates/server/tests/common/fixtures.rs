//! Test fixtures and data generators.

use async_compression::tokio::write::GzipEncoder;
use logward_core::EnvelopeHeader;
use tokio::io::AsyncWriteExt;

/// Build an envelope header for `participants` in zone 1001.
#[allow(dead_code)]
pub fn test_header(participants: &[&str]) -> EnvelopeHeader {
    EnvelopeHeader {
        zone_id: 1001,
        boss_id: 42,
        started_at_ms: 1_700_000_000_000,
        ended_at_ms: 1_700_000_095_500,
        participants: participants.iter().map(|p| p.to_string()).collect(),
    }
}

/// Encode a header followed by some opaque event records.
#[allow(dead_code)]
pub fn test_log(header: &EnvelopeHeader) -> Vec<u8> {
    let mut payload = header.encode().expect("valid header").to_vec();
    payload.extend((0..4096u32).flat_map(|i| i.to_le_bytes()));
    payload
}

/// Gzip-compress `data`.
#[allow(dead_code)]
pub async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

/// A compressed log and its declared decompressed size.
#[allow(dead_code)]
pub async fn compressed_log(header: &EnvelopeHeader) -> (Vec<u8>, u64) {
    let plain = test_log(header);
    let size = plain.len() as u64;
    (gzip(&plain).await, size)
}
