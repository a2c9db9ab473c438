//! Request ID propagation and HTTP metrics middleware.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::metrics::METRICS;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID extension type.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Tags each request with an ID (taken from the client or generated)
/// and runs the rest of the stack inside a span carrying it.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Records HTTP request counts and latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    METRICS.http_active_connections.inc();
    let response = next.run(request).await;
    METRICS.http_active_connections.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    METRICS.record_http_request(&method, &path, status, duration);

    tracing::debug!(
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %format!("{:.2}", duration * 1000.0),
        "Request completed"
    );

    response
}

/// Prometheus scrape endpoint.
pub async fn metrics_handler() -> Response<Body> {
    match METRICS.encode() {
        Ok(text) => (
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}
