//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    calibrate, current_distance, detection_stats, get_recovery_config, health,
    refresh_detector, root, update_recovery_config,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;
use crate::ws::{ws_detection, ws_flur, ws_live};

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api_routes = Router::new()
        .route("/distance/current", get(current_distance))
        .route("/detection/stats", get(detection_stats))
        .route("/detector/refresh", post(refresh_detector))
        .route(
            "/distance-recovery-config",
            get(get_recovery_config).put(update_recovery_config),
        )
        .route("/calibration", post(calibrate));

    let ws_routes = Router::new()
        .route("/ws/live", get(ws_live))
        .route("/ws/detection", get(ws_detection))
        .route("/ws/flur", get(ws_flur));

    let health_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
