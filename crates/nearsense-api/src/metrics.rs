//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "nearsense_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "nearsense_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "nearsense_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "nearsense_ws_connections_total";
    pub const WS_SESSIONS_ACTIVE: &str = "nearsense_ws_sessions_active";
    pub const WS_MESSAGES_SENT: &str = "nearsense_ws_messages_sent_total";
    pub const WS_STARTUP_FAILURES: &str = "nearsense_ws_startup_failures_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a WebSocket upgrade.
pub fn record_ws_connection(endpoint: &'static str) {
    counter!(names::WS_CONNECTIONS_TOTAL, "endpoint" => endpoint).increment(1);
}

/// Update the active WebSocket sessions gauge.
pub fn set_ws_active_sessions(count: i64) {
    gauge!(names::WS_SESSIONS_ACTIVE).set(count as f64);
}

/// Record a WebSocket message sent.
pub fn record_ws_message_sent(endpoint: &'static str) {
    counter!(names::WS_MESSAGES_SENT, "endpoint" => endpoint).increment(1);
}

/// Record a session that ended because the pipeline could not start.
pub fn record_ws_startup_failure(endpoint: &'static str) {
    counter!(names::WS_STARTUP_FAILURES, "endpoint" => endpoint).increment(1);
}

/// Route template for metric labels; unmatched paths collapse to one label.
fn route_label(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = route_label(&request);
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label_for_unrouted_request() {
        let request = Request::builder()
            .uri("/nope/123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(route_label(&request), "unmatched");
    }
}
