//! Detection snapshot, stats, refresh and calibration handlers.

use axum::extract::State;
use axum::Json;
use nearsense_models::{
    ApiResponse, CalibrationRequest, CalibrationResult, DetectionStats, ResultFrame,
};
use serde::Serialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::{load_sensor_config, AppState};

/// Latest result frame, polled over REST.
///
/// Before any frame has been produced this is an `error` envelope, not an
/// HTTP error.
pub async fn current_distance(State(state): State<AppState>) -> Json<ApiResponse<ResultFrame>> {
    match state.pipeline().snapshot() {
        Some(frame) => Json(ApiResponse::success_with_message(
            "Current distance retrieved",
            frame,
        )),
        None => Json(ApiResponse::error(
            "Detector not started or no data available",
        )),
    }
}

pub async fn detection_stats(State(state): State<AppState>) -> Json<ApiResponse<DetectionStats>> {
    let stats = state.pipeline().stats().await;
    Json(ApiResponse::success_with_message(
        "Detection stats retrieved",
        stats,
    ))
}

#[derive(Debug, Serialize)]
pub struct RefreshOutcome {
    pub is_running: bool,
    pub connections: usize,
}

/// Re-read the sensor config file and apply it, restarting an active run.
pub async fn refresh_detector(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<RefreshOutcome>>> {
    let path = state.config.sensor_config_path.clone();
    let sensor = load_sensor_config(&path)?;
    state.connections.reload(sensor).await?;

    info!(path = %path.display(), "Detector configuration refreshed");
    Ok(Json(ApiResponse::success_with_message(
        "Detector configuration reloaded",
        RefreshOutcome {
            is_running: state.pipeline().is_running(),
            connections: state.connections.connection_count(),
        },
    )))
}

/// Fit the focal length to `[box_height, distance]` measurements.
pub async fn calibrate(
    State(state): State<AppState>,
    Json(request): Json<CalibrationRequest>,
) -> ApiResult<Json<ApiResponse<CalibrationResult>>> {
    if request.measurements.is_empty() {
        return Err(ApiError::validation("measurements must not be empty"));
    }

    let (focal_length, std_dev) = state.pipeline().calibrate_multi(&request.measurements)?;
    info!(
        focal_length,
        std_dev,
        points = request.measurements.len(),
        "Focal length calibrated"
    );

    Ok(Json(ApiResponse::success_with_message(
        "Calibration complete",
        CalibrationResult {
            focal_length,
            std_dev,
        },
    )))
}
