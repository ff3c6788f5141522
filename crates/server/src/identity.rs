//! Uploader identity and request correlation.
//!
//! Authentication itself happens upstream. This layer only turns whatever
//! the front proxy forwarded into an [`OwnerId`] and attaches a trace id to
//! every request.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use logward_core::OwnerId;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Header used to propagate the trace ID.
const TRACE_ID_HEADER: &str = "x-trace-id";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves the uploader behind a request.
pub trait IdentityResolver: Send + Sync {
    /// Returns `None` when the request carries no usable identity.
    fn resolve(&self, headers: &HeaderMap) -> Option<OwnerId>;
}

/// Reads the uploader id from a header set by a trusted proxy.
#[derive(Clone, Debug)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: &str) -> ApiResult<Self> {
        let header = HeaderName::try_from(header)
            .map_err(|e| ApiError::Internal(format!("invalid identity header {header:?}: {e}")))?;
        Ok(Self { header })
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Option<OwnerId> {
        let value = headers.get(&self.header)?.to_str().ok()?;
        OwnerId::new(value.trim()).ok()
    }
}

/// Authenticated uploader request extension.
#[derive(Clone, Debug)]
pub struct Uploader(pub OwnerId);

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Middleware that resolves the uploader and sets up trace context.
///
/// Requests without an identity continue; handlers that need one call
/// [`require_uploader`].
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let owner = state.identity.resolve(req.headers());
    let span = match &owner {
        Some(owner) => tracing::info_span!("request", trace_id = %trace_id_str, owner = %owner),
        None => tracing::info_span!("request", trace_id = %trace_id_str),
    };
    if let Some(owner) = owner {
        req.extensions_mut().insert(Uploader(owner));
    }

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id_str) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Require an identified uploader.
pub fn require_uploader(req: &Request) -> ApiResult<&OwnerId> {
    req.extensions()
        .get::<Uploader>()
        .map(|uploader| &uploader.0)
        .ok_or_else(|| ApiError::Unauthorized("uploader identity required".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\ndef");
        assert_eq!(id.as_str(), "abcdef");

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);

        // Entirely unprintable input falls back to a generated id
        let generated = TraceId::from_client("\u{1}\u{2}");
        assert!(Uuid::parse_str(generated.as_str()).is_ok());
    }

    #[test]
    fn test_header_identity() {
        let resolver = HeaderIdentity::new("x-owner-id").unwrap();

        let mut headers = HeaderMap::new();
        assert!(resolver.resolve(&headers).is_none());

        headers.insert("x-owner-id", HeaderValue::from_static("  player-42 "));
        assert_eq!(resolver.resolve(&headers).unwrap().as_str(), "player-42");

        headers.insert("x-owner-id", HeaderValue::from_static("   "));
        assert!(resolver.resolve(&headers).is_none());
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        assert!(HeaderIdentity::new("not a header").is_err());
    }
}
