//! Shared data models for the NearSense distance service.
//!
//! This crate provides Serde-serializable types for:
//! - Detections and per-frame results
//! - Sensor configuration
//! - WebSocket stream messages
//! - REST envelopes

pub mod api;
pub mod config;
pub mod detection;
pub mod error;
pub mod ws;

// Re-export common types
pub use api::{ApiResponse, ApiStatus, CalibrationRequest, CalibrationResult, DetectionStats};
pub use config::{
    CameraConfig, Device, DistanceConfig, DistanceMappingConfig, ModelConfig, PerformanceConfig,
    RecoveryConfig, Rotation, SensorConfig, StreamingConfig,
};
pub use detection::{closest_distance, round1, BoundingBox, Detection, ResultFrame};
pub use error::{ModelsError, ModelsResult};
pub use ws::{unix_timestamp, Resolution, StreamMessage};
