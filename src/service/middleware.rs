//! Service middleware for request metrics.
//!
//! ## Metrics Logged
//!
//! - `request_metric`: path pattern, method, status and latency per request
//! - `ingest_metric`: scroll events and login sessions queued per request

use axum::{extract::Request, middleware::Next, response::Response};
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing; counters are aggregated from the logs.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "pad_replay::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

fn pad_segment() -> &'static Regex {
    static PAD_SEGMENT: OnceLock<Regex> = OnceLock::new();
    PAD_SEGMENT.get_or_init(|| Regex::new(r"^/api/pads/[^/]+").expect("pad segment pattern is valid"))
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Replaces the pad name with a `:pad` placeholder.
fn normalize_path(path: &str) -> String {
    pad_segment().replace(path, "/api/pads/:pad").to_string()
}

/// Record how many external events a request queued.
pub fn record_ingest(kind: &str, queued: usize) {
    info!(
        target: "pad_replay::metrics",
        metric_type = "ingest",
        kind = kind,
        queued = queued,
        "ingest_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_replaces_pad() {
        assert_eq!(
            normalize_path("/api/pads/my-pad.2024/cohesion"),
            "/api/pads/:pad/cohesion"
        );
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
