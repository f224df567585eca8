//! Sensor configuration.
//!
//! Read from a JSON file. Every field has a default so partial files are
//! accepted; [`SensorConfig::validate`] rejects values that would break
//! the distance math or the pipeline loop.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelsError, ModelsResult};

/// Frame rotation applied before detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(format!("rotation must be 0, 90, 180 or 270, got {}", other)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

/// Inference device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

/// Camera capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CameraConfig {
    /// Device index ("0"), device path, file or stream URL
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default = "default_camera_width")]
    pub width: u32,

    #[serde(default = "default_camera_height")]
    pub height: u32,

    #[serde(default)]
    pub rotation: Rotation,

    /// FFmpeg input format (e.g. "v4l2", "avfoundation", "dshow")
    #[serde(default)]
    pub input_format: Option<String>,
}

fn default_source() -> String {
    "0".to_string()
}
fn default_camera_width() -> u32 {
    1280
}
fn default_camera_height() -> u32 {
    720
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            width: default_camera_width(),
            height: default_camera_height(),
            rotation: Rotation::default(),
            input_format: None,
        }
    }
}

/// Detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelConfig {
    /// Path to the ONNX model
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Confidence threshold
    #[serde(default = "default_conf")]
    pub conf: f32,

    /// NMS IoU threshold
    #[serde(default = "default_iou")]
    pub iou: f32,

    /// Square input size of the model
    #[serde(default = "default_imgsz")]
    pub imgsz: u32,

    #[serde(default)]
    pub device: Device,

    /// Run detection on every Nth frame
    #[serde(default = "default_vid_stride")]
    pub vid_stride: u32,

    /// Minimum IoU for a detection to continue a track
    #[serde(default = "default_tracker_iou")]
    pub tracker_iou: f64,

    /// Frames a track may go unmatched before it is dropped
    #[serde(default = "default_tracker_max_gap")]
    pub tracker_max_gap: u32,
}

fn default_model_path() -> String {
    "models/yolo11n.onnx".to_string()
}
fn default_conf() -> f32 {
    0.5
}
fn default_iou() -> f32 {
    0.45
}
fn default_imgsz() -> u32 {
    640
}
fn default_vid_stride() -> u32 {
    1
}
fn default_tracker_iou() -> f64 {
    0.3
}
fn default_tracker_max_gap() -> u32 {
    30
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            conf: default_conf(),
            iou: default_iou(),
            imgsz: default_imgsz(),
            device: Device::default(),
            vid_stride: default_vid_stride(),
            tracker_iou: default_tracker_iou(),
            tracker_max_gap: default_tracker_max_gap(),
        }
    }
}

/// Distance estimation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DistanceConfig {
    /// Focal length in pixels
    #[serde(default = "default_focal_length")]
    pub focal_length: f64,

    /// Standing height of a person in centimeters
    #[serde(default = "default_person_height")]
    pub real_person_height: f64,

    #[serde(default = "default_true")]
    pub use_adaptive_height: bool,

    /// Box aspect ratio (h/w) at or above which a person counts as standing
    #[serde(default = "default_standing_ratio")]
    pub standing_ratio: f64,

    #[serde(default = "default_crouching_factor")]
    pub crouching_height_factor: f64,

    #[serde(default = "default_sitting_factor")]
    pub sitting_height_factor: f64,

    #[serde(default = "default_true")]
    pub use_smoothing: bool,

    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    #[serde(default = "default_true")]
    pub use_display_smoothing: bool,

    /// EMA weight of the newest value, in (0, 1]
    #[serde(default = "default_display_smooth_factor")]
    pub display_smooth_factor: f64,

    /// Per-track state is dropped after this long unseen; 0 keeps it forever
    #[serde(default = "default_track_ttl_ms")]
    pub track_ttl_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_focal_length() -> f64 {
    800.0
}
fn default_person_height() -> f64 {
    170.0
}
fn default_standing_ratio() -> f64 {
    2.5
}
fn default_crouching_factor() -> f64 {
    0.75
}
fn default_sitting_factor() -> f64 {
    0.6
}
fn default_smoothing_window() -> usize {
    5
}
fn default_display_smooth_factor() -> f64 {
    0.3
}
fn default_track_ttl_ms() -> u64 {
    10_000
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            focal_length: default_focal_length(),
            real_person_height: default_person_height(),
            use_adaptive_height: true,
            standing_ratio: default_standing_ratio(),
            crouching_height_factor: default_crouching_factor(),
            sitting_height_factor: default_sitting_factor(),
            use_smoothing: true,
            smoothing_window: default_smoothing_window(),
            use_display_smoothing: true,
            display_smooth_factor: default_display_smooth_factor(),
            track_ttl_ms: default_track_ttl_ms(),
        }
    }
}

/// Loop pacing and backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub use_fps_limit: bool,

    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    #[serde(default = "default_read_failure_backoff_ms")]
    pub read_failure_backoff_ms: u64,

    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Number of latency samples behind `actual_fps`
    #[serde(default = "default_stats_window")]
    pub stats_window: usize,
}

fn default_target_fps() -> u32 {
    30
}
fn default_read_failure_backoff_ms() -> u64 {
    1000
}
fn default_error_backoff_ms() -> u64 {
    100
}
fn default_stats_window() -> usize {
    30
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            use_fps_limit: false,
            target_fps: default_target_fps(),
            read_failure_backoff_ms: default_read_failure_backoff_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            stats_window: default_stats_window(),
        }
    }
}

/// Graceful-degradation settings for the live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long the last distance is held after the subject disappears
    #[serde(default = "default_deactivation_delay_ms")]
    pub deactivation_delay_ms: u64,

    /// Duration of the eased ramp toward the target
    #[serde(default = "default_recovery_duration_ms")]
    pub recovery_duration_ms: u64,

    /// Distance (cm) the ramp ends at
    #[serde(default = "default_recovery_target")]
    pub recovery_target_distance: f64,
}

fn default_deactivation_delay_ms() -> u64 {
    1000
}
fn default_recovery_duration_ms() -> u64 {
    3000
}
fn default_recovery_target() -> f64 {
    500.0
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deactivation_delay_ms: default_deactivation_delay_ms(),
            recovery_duration_ms: default_recovery_duration_ms(),
            recovery_target_distance: default_recovery_target(),
        }
    }
}

/// Distance range the adaptive encoder maps over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DistanceMappingConfig {
    #[serde(default = "default_min_distance")]
    pub min_distance: f64,

    #[serde(default = "default_max_distance")]
    pub max_distance: f64,
}

fn default_min_distance() -> f64 {
    50.0
}
fn default_max_distance() -> f64 {
    500.0
}

impl Default for DistanceMappingConfig {
    fn default() -> Self {
        Self {
            min_distance: default_min_distance(),
            max_distance: default_max_distance(),
        }
    }
}

/// Preview stream encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StreamingConfig {
    #[serde(default = "default_min_resolution_width")]
    pub min_resolution_width: u32,

    #[serde(default = "default_max_resolution_width")]
    pub max_resolution_width: u32,

    #[serde(default = "default_min_quality")]
    pub min_quality: u8,

    #[serde(default = "default_max_quality")]
    pub max_quality: u8,

    #[serde(default = "default_true")]
    pub enable_dynamic_resolution: bool,

    #[serde(default)]
    pub enable_dynamic_quality: bool,

    /// Quality used when dynamic quality is off
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Tick of the preview stream; live and detection streams follow the pipeline
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
}

fn default_min_resolution_width() -> u32 {
    320
}
fn default_max_resolution_width() -> u32 {
    1920
}
fn default_min_quality() -> u8 {
    30
}
fn default_max_quality() -> u8 {
    85
}
fn default_jpeg_quality() -> u8 {
    70
}
fn default_broadcast_interval_ms() -> u64 {
    33
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_resolution_width: default_min_resolution_width(),
            max_resolution_width: default_max_resolution_width(),
            min_quality: default_min_quality(),
            max_quality: default_max_quality(),
            enable_dynamic_resolution: true,
            enable_dynamic_quality: false,
            jpeg_quality: default_jpeg_quality(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
        }
    }
}

/// Complete sensor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SensorConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub distance: DistanceConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub distance_mapping: DistanceMappingConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl SensorConfig {
    /// Read and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> ModelsResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelsError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> ModelsResult<Self> {
        let config: SensorConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> ModelsResult<()> {
        let d = &self.distance;
        if d.smoothing_window < 1 {
            return Err(ModelsError::invalid("distance.smoothing_window", "must be at least 1"));
        }
        if !(d.display_smooth_factor > 0.0 && d.display_smooth_factor <= 1.0) {
            return Err(ModelsError::invalid(
                "distance.display_smooth_factor",
                "must be in (0, 1]",
            ));
        }
        if d.focal_length <= 0.0 {
            return Err(ModelsError::invalid("distance.focal_length", "must be positive"));
        }
        if d.real_person_height <= 0.0 {
            return Err(ModelsError::invalid("distance.real_person_height", "must be positive"));
        }

        if self.model.vid_stride < 1 {
            return Err(ModelsError::invalid("model.vid_stride", "must be at least 1"));
        }
        if self.model.imgsz == 0 {
            return Err(ModelsError::invalid("model.imgsz", "must be positive"));
        }

        if self.performance.use_fps_limit && self.performance.target_fps == 0 {
            return Err(ModelsError::invalid("performance.target_fps", "must be positive"));
        }
        if self.performance.stats_window < 1 {
            return Err(ModelsError::invalid("performance.stats_window", "must be at least 1"));
        }

        let m = &self.distance_mapping;
        if m.min_distance >= m.max_distance {
            return Err(ModelsError::invalid(
                "distance_mapping",
                format!("min_distance {} must be below max_distance {}", m.min_distance, m.max_distance),
            ));
        }

        let s = &self.streaming;
        if s.min_resolution_width >= s.max_resolution_width {
            return Err(ModelsError::invalid(
                "streaming.resolution_width",
                "min_resolution_width must be below max_resolution_width",
            ));
        }
        if s.min_quality >= s.max_quality || s.min_quality == 0 || s.max_quality > 100 {
            return Err(ModelsError::invalid(
                "streaming.quality",
                "expected 1 <= min_quality < max_quality <= 100",
            ));
        }
        if s.jpeg_quality == 0 || s.jpeg_quality > 100 {
            return Err(ModelsError::invalid("streaming.jpeg_quality", "must be in 1..=100"));
        }
        if s.broadcast_interval_ms == 0 {
            return Err(ModelsError::invalid("streaming.broadcast_interval_ms", "must be positive"));
        }

        Ok(())
    }
}
