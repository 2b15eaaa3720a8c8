//! The 429 response returned to rate limited callers.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

/// Message returned to rejected callers.
pub const REJECTION_MESSAGE: &str = "Too many requests. Please try again later.";

#[derive(Debug, Serialize)]
struct RejectionBody {
    success: bool,
    error: &'static str,
    #[serde(rename = "retryAfter")]
    retry_after: Value,
}

/// Whole seconds a caller is told to wait: the window length rounded up.
pub fn retry_after_secs(window_ms: u64) -> u64 {
    window_ms.div_ceil(1000)
}

/// Window length in seconds as a JSON number.
///
/// Whole-second windows serialize as integers, others keep their fraction.
fn window_secs_json(window_ms: u64) -> Value {
    if window_ms % 1000 == 0 {
        Value::from(window_ms / 1000)
    } else {
        Value::from(window_ms as f64 / 1000.0)
    }
}

/// Build the rejection for a limiter with the given window.
///
/// The advice depends only on the window, never on how long the caller has
/// already been blocked.
pub fn rejection_response(window_ms: u64) -> Response {
    let body = RejectionBody {
        success: false,
        error: REJECTION_MESSAGE,
        retry_after: window_secs_json(window_ms),
    };

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs(window_ms).to_string())],
        Json(body),
    )
        .into_response()
}
