//! Encounter log envelope.
//!
//! Uploaded logs are opaque except for a fixed header that carries what the
//! ingestion pipeline needs: the zone, the participating entities and the
//! encounter timing. Everything after the header is passed through untouched.
//!
//! ```text
//! magic "ELOG" | version u8 | zone i32 | boss u32 | start i64 | end i64
//! | count u16 | count x (len u8, utf-8 id) | events...
//! ```
//!
//! All integers are big-endian; timestamps are unix milliseconds.

use crate::association::Association;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Leading magic bytes of a decompressed encounter log.
pub const ENVELOPE_MAGIC: &[u8; 4] = b"ELOG";

/// The only envelope version understood by this crate.
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of the fixed part of the header, before the participant list.
const FIXED_HEADER_LEN: usize = 4 + 1 + 4 + 4 + 8 + 8 + 2;

/// Decoded envelope header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub zone_id: i32,
    /// Zero when the encounter had no boss.
    pub boss_id: u32,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    /// Participant ids as written by the client (unordered, may repeat).
    pub participants: Vec<String>,
}

impl EnvelopeHeader {
    /// Decode the header at the start of `payload`.
    ///
    /// Only structure is checked here; timing consistency is checked by
    /// [`EnvelopeHeader::duration_ms`].
    pub fn decode(payload: &[u8]) -> crate::Result<Self> {
        let mut buf = payload;
        if buf.remaining() < FIXED_HEADER_LEN {
            return Err(invalid(format!(
                "header truncated: {} bytes, need at least {FIXED_HEADER_LEN}",
                payload.len()
            )));
        }

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != ENVELOPE_MAGIC {
            return Err(invalid("bad magic bytes".to_string()));
        }

        let version = buf.get_u8();
        if version != ENVELOPE_VERSION {
            return Err(invalid(format!("unsupported version {version}")));
        }

        let zone_id = buf.get_i32();
        let boss_id = buf.get_u32();
        let started_at_ms = buf.get_i64();
        let ended_at_ms = buf.get_i64();
        let count = usize::from(buf.get_u16());

        let mut participants = Vec::with_capacity(count);
        for index in 0..count {
            if !buf.has_remaining() {
                return Err(invalid(format!("participant {index} truncated")));
            }
            let len = usize::from(buf.get_u8());
            if len == 0 {
                return Err(invalid(format!("participant {index} is empty")));
            }
            if buf.remaining() < len {
                return Err(invalid(format!("participant {index} truncated")));
            }
            let id = std::str::from_utf8(&buf[..len])
                .map_err(|e| invalid(format!("participant {index} is not utf-8: {e}")))?;
            participants.push(id.to_string());
            buf.advance(len);
        }

        Ok(Self {
            zone_id,
            boss_id,
            started_at_ms,
            ended_at_ms,
            participants,
        })
    }

    /// Encode the header. Callers append the event stream afterwards.
    pub fn encode(&self) -> crate::Result<Bytes> {
        let count = u16::try_from(self.participants.len())
            .map_err(|_| invalid(format!("too many participants: {}", self.participants.len())))?;

        let mut buf = BytesMut::with_capacity(FIXED_HEADER_LEN + self.participants.len() * 16);
        buf.put_slice(ENVELOPE_MAGIC);
        buf.put_u8(ENVELOPE_VERSION);
        buf.put_i32(self.zone_id);
        buf.put_u32(self.boss_id);
        buf.put_i64(self.started_at_ms);
        buf.put_i64(self.ended_at_ms);
        buf.put_u16(count);
        for id in &self.participants {
            let len = u8::try_from(id.len())
                .ok()
                .filter(|len| *len > 0)
                .ok_or_else(|| invalid(format!("participant id length {} out of range", id.len())))?;
            buf.put_u8(len);
            buf.put_slice(id.as_bytes());
        }
        Ok(buf.freeze())
    }

    /// Build the deduplication key for this encounter.
    pub fn association(&self) -> crate::Result<Association> {
        Association::build(self.zone_id, &self.participants)
    }

    /// Encounter length in milliseconds.
    pub fn duration_ms(&self) -> crate::Result<u64> {
        self.ended_at_ms
            .checked_sub(self.started_at_ms)
            .and_then(|d| u64::try_from(d).ok())
            .ok_or_else(|| {
                invalid(format!(
                    "encounter ends ({}) before it starts ({})",
                    self.ended_at_ms, self.started_at_ms
                ))
            })
    }

    /// Boss id, if the encounter had one.
    pub fn boss(&self) -> Option<u32> {
        (self.boss_id != 0).then_some(self.boss_id)
    }
}

fn invalid(message: String) -> crate::Error {
    crate::Error::InvalidEnvelope(message)
}
