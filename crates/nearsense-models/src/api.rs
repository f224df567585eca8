//! REST response envelope and payloads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ws::unix_timestamp;

/// Envelope status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Success,
    Error,
}

/// Standard REST envelope: `{status, message, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiResponse<T> {
    pub status: ApiStatus,
    pub message: Option<String>,
    pub data: Option<T>,
    pub timestamp: f64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: ApiStatus::Success,
            message: None,
            data: Some(data),
            timestamp: unix_timestamp(),
        }
    }

    pub fn success_with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(data)
        }
    }

    /// An error envelope with no payload.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            message: Some(message.into()),
            data: None,
            timestamp: unix_timestamp(),
        }
    }
}

/// Pipeline statistics exposed over REST.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionStats {
    pub total_count: usize,
    pub closest_distance: f64,
    pub fps: u32,
    pub actual_fps: u32,
    pub is_running: bool,
    /// Seconds since the current run started
    pub uptime: f64,
}

/// Calibration request: `[box_height_px, known_distance_cm]` pairs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CalibrationRequest {
    pub measurements: Vec<(f64, f64)>,
}

/// Calibration outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CalibrationResult {
    pub focal_length: f64,
    pub std_dev: f64,
}
