//! Per-request tracing spans and request IDs.
//!
//! Reuses an incoming `X-Request-Id` (set by a reverse proxy) when present,
//! otherwise generates a ULID. The resolved ID is echoed back on the response.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{Instrument, debug, warn};

static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Longest incoming ID accepted as-is.
const MAX_INCOMING_LEN: usize = 128;

pub async fn request_id(req: Request, next: Next) -> Response {
    let req_id = incoming_id(&req).unwrap_or_else(|| ulid::Ulid::new().to_string());
    let span = tracing::info_span!(
        "request",
        req_id = %req_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let start = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;

    span.in_scope(|| {
        // 4xx is an expected outcome here (unknown user, build in progress).
        if response.status().is_server_error() {
            warn!(status, duration_ms, "Response");
        } else {
            debug!(status, duration_ms, "Response");
        }
    });

    if let Ok(value) = HeaderValue::from_str(&req_id) {
        response.headers_mut().insert(REQUEST_ID.clone(), value);
    }
    response
}

fn incoming_id(req: &Request) -> Option<String> {
    req.headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_INCOMING_LEN)
        .map(String::from)
}
