//! Error types for sensing operations.

use thiserror::Error;

/// Result type for sensing operations.
pub type SensingResult<T> = Result<T, SensingError>;

/// Errors that can occur while capturing, detecting or streaming.
#[derive(Debug, Error)]
pub enum SensingError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Frame read failed: {0}")]
    FrameRead(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Calibration failed: {0}")]
    Calibration(String),

    #[error("Invalid config: {0}")]
    Config(#[from] nearsense_models::ModelsError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SensingError {
    /// Create a source unavailable error.
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable(message.into())
    }

    /// Create a frame read error.
    pub fn frame_read(message: impl Into<String>) -> Self {
        Self::FrameRead(message.into())
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create a model load error.
    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad(message.into())
    }

    /// Create a detection failure error.
    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed(message.into())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }

    /// Create a calibration error.
    pub fn calibration(message: impl Into<String>) -> Self {
        Self::Calibration(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the pipeline failed to come up, as opposed to a per-frame fault.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::FfmpegNotFound
                | Self::SourceUnavailable(_)
                | Self::ModelNotFound(_)
                | Self::ModelLoad(_)
        )
    }
}
