//! Bounded gzip decompression.
//!
//! Upload bodies are untrusted, so inflation is capped twice: the stream is
//! aborted as soon as the decompressed output would exceed `max_size`, and a
//! completed stream must match the size the client declared up front.

use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// gzip member header magic.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on a single read from the decoder.
const READ_CHUNK: usize = 64 * 1024;

/// Upper bound on the initial output allocation, regardless of declared size.
const MAX_INITIAL_CAPACITY: usize = 1024 * 1024;

/// Reasons a payload could not be inflated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecompressError {
    #[error("payload is empty")]
    EmptyInput,

    #[error("payload is not gzip compressed")]
    NotGzip,

    #[error("decompressed size {actual} does not match declared size {expected}")]
    SizeMismatch { actual: u64, expected: u64 },

    #[error("decompressed size exceeds limit of {max} bytes")]
    SizeExceededMax { max: u64 },

    #[error("compressed stream is incomplete or corrupt: {0}")]
    IncompleteStream(String),
}

impl DecompressError {
    /// Stable error code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            DecompressError::EmptyInput => "empty_input",
            DecompressError::NotGzip => "not_gzip",
            DecompressError::SizeMismatch { .. } => "size_mismatch",
            DecompressError::SizeExceededMax { .. } => "size_exceeded_max",
            DecompressError::IncompleteStream(_) => "incomplete_stream",
        }
    }
}

/// Inflate a gzip `payload` that the client declared as `expected_size`
/// bytes, never producing more than `max_size` bytes.
///
/// Holds no shared state; concurrent calls are independent.
pub async fn decompress(
    payload: &[u8],
    expected_size: u64,
    max_size: u64,
) -> Result<Bytes, DecompressError> {
    if payload.is_empty() {
        return Err(DecompressError::EmptyInput);
    }
    if !payload.starts_with(&GZIP_MAGIC) {
        return Err(DecompressError::NotGzip);
    }
    // A declared size over the limit can never succeed.
    if expected_size > max_size {
        return Err(DecompressError::SizeExceededMax { max: max_size });
    }

    let capacity = usize::try_from(expected_size)
        .unwrap_or(usize::MAX)
        .min(MAX_INITIAL_CAPACITY);
    let mut output = Vec::with_capacity(capacity);
    let mut decoder = GzipDecoder::new(payload);
    // Concatenated members form one stream; anything else trailing fails.
    decoder.multiple_members(true);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut total: u64 = 0;

    loop {
        // Read at most one byte past the limit so overflow is seen without
        // inflating further.
        let allowance = max_size.saturating_sub(total).saturating_add(1);
        let want = usize::try_from(allowance)
            .unwrap_or(usize::MAX)
            .min(READ_CHUNK);
        let n = decoder
            .read(&mut chunk[..want])
            .await
            .map_err(|e| DecompressError::IncompleteStream(e.to_string()))?;
        if n == 0 {
            break;
        }

        total += n as u64;
        if total > max_size {
            return Err(DecompressError::SizeExceededMax { max: max_size });
        }
        output.extend_from_slice(&chunk[..n]);
    }

    if total != expected_size {
        return Err(DecompressError::SizeMismatch {
            actual: total,
            expected: expected_size,
        });
    }

    Ok(Bytes::from(output))
}
