//! Client fingerprint extraction.
//!
//! A fingerprint is the string key under which a caller's request history is
//! tracked. The default combines the forwarded client address with a short
//! encoding of the user agent. It is a heuristic: callers behind the same
//! address with the same agent share a key.

use axum::http::{HeaderMap, Method, Request, Uri};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

use crate::error::KeyError;

/// Headers consulted for the client address, in priority order.
const ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "x-client-ip"];
/// Address used when no header identifies the client.
const UNKNOWN_ADDRESS: &str = "unknown";
/// Number of base64 characters of the user agent kept in the key.
const AGENT_PREFIX_LEN: usize = 20;

/// A borrowed view of the parts of a request a key extractor may inspect.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestInfo<'a> {
    /// Borrow the inspectable parts of a request.
    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        Self {
            method: request.method(),
            uri: request.uri(),
            headers: request.headers(),
        }
    }

    /// Look up a header as a string, ignoring values that are not valid text.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Derives the rate limit key for a request.
pub trait KeyExtractor: Send + Sync {
    /// Produce the key for `request`.
    fn extract(&self, request: &RequestInfo<'_>) -> Result<String, KeyError>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&RequestInfo<'_>) -> Result<String, KeyError> + Send + Sync,
{
    fn extract(&self, request: &RequestInfo<'_>) -> Result<String, KeyError> {
        self(request)
    }
}

/// The built-in address plus user-agent fingerprint.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyExtractor;

impl DefaultKeyExtractor {
    /// Compute the fingerprint. Never fails.
    pub fn fingerprint(request: &RequestInfo<'_>) -> String {
        format!(
            "{}:{}",
            client_address(request),
            agent_prefix(request.headers)
        )
    }
}

impl KeyExtractor for DefaultKeyExtractor {
    fn extract(&self, request: &RequestInfo<'_>) -> Result<String, KeyError> {
        Ok(Self::fingerprint(request))
    }
}

/// Resolve the key for a request, preferring `custom` when given.
///
/// A custom extractor that fails, panics or returns a blank key is logged
/// and replaced by the default fingerprint; the request is never failed here.
pub fn resolve_key(custom: Option<&dyn KeyExtractor>, request: &RequestInfo<'_>) -> String {
    let Some(extractor) = custom else {
        return DefaultKeyExtractor::fingerprint(request);
    };

    let extracted = match catch_unwind(AssertUnwindSafe(|| extractor.extract(request))) {
        Ok(extracted) => extracted,
        Err(_) => {
            warn!(
                path = %request.uri.path(),
                "Custom key extractor panicked, using default fingerprint"
            );
            return DefaultKeyExtractor::fingerprint(request);
        }
    };

    match extracted {
        Ok(key) if !key.trim().is_empty() => key,
        Ok(_) => {
            warn!(
                path = %request.uri.path(),
                "Custom key extractor returned an empty key, using default fingerprint"
            );
            DefaultKeyExtractor::fingerprint(request)
        }
        Err(e) => {
            warn!(
                path = %request.uri.path(),
                error = %e,
                "Custom key extractor failed, using default fingerprint"
            );
            DefaultKeyExtractor::fingerprint(request)
        }
    }
}

fn client_address<'a>(request: &RequestInfo<'a>) -> &'a str {
    ADDRESS_HEADERS
        .iter()
        .filter_map(|name| request.header(name))
        .map(|value| value.split(',').next().unwrap_or_default().trim())
        .find(|addr| !addr.is_empty())
        .unwrap_or(UNKNOWN_ADDRESS)
}

fn agent_prefix(headers: &HeaderMap) -> String {
    let agent = headers
        .get("user-agent")
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    let mut encoded = STANDARD.encode(agent);
    encoded.truncate(AGENT_PREFIX_LEN);
    encoded
}
