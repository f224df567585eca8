//! Recovery settings handlers.
//!
//! Changes live in memory only and apply to live sessions opened afterwards.

use axum::extract::State;
use axum::Json;
use nearsense_models::{ApiResponse, RecoveryConfig};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn get_recovery_config(
    State(state): State<AppState>,
) -> Json<ApiResponse<RecoveryConfig>> {
    let config = state.recovery.read().await.clone();
    Json(ApiResponse::success(config))
}

pub async fn update_recovery_config(
    State(state): State<AppState>,
    Json(update): Json<RecoveryConfig>,
) -> ApiResult<Json<ApiResponse<RecoveryConfig>>> {
    if !(update.recovery_target_distance.is_finite() && update.recovery_target_distance >= 0.0) {
        return Err(ApiError::validation(
            "recovery_target_distance must be a non-negative number",
        ));
    }

    *state.recovery.write().await = update.clone();
    info!(
        enabled = update.enabled,
        deactivation_delay_ms = update.deactivation_delay_ms,
        recovery_duration_ms = update.recovery_duration_ms,
        target = update.recovery_target_distance,
        "Recovery settings updated"
    );

    Ok(Json(ApiResponse::success_with_message(
        "Recovery settings updated; applies to new sessions",
        update,
    )))
}
