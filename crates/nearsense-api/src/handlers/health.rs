//! Service info and health handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use nearsense_models::ApiResponse;
use serde::Serialize;

use crate::state::AppState;

/// Service info response.
#[derive(Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub endpoints: Endpoints,
}

#[derive(Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub distance_current: &'static str,
    pub detection_stats: &'static str,
    pub websocket_live: &'static str,
    pub websocket_detection: &'static str,
    pub websocket_flur: &'static str,
}

/// Root endpoint: what this service is and where to find it.
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "NearSense distance detection API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: Endpoints {
            health: "/health",
            distance_current: "/api/distance/current",
            detection_stats: "/api/detection/stats",
            websocket_live: "/ws/live",
            websocket_detection: "/ws/detection",
            websocket_flur: "/ws/flur",
        },
    })
}

/// Health payload.
#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub detector_running: bool,
    pub connections: usize,
    pub uptime_secs: u64,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success_with_message(
        "Service is running",
        HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            detector_running: state.pipeline().is_running(),
            connections: state.connections.connection_count(),
            uptime_secs: state.started_at.elapsed().as_secs(),
            timestamp: Utc::now().to_rfc3339(),
        },
    ))
}
