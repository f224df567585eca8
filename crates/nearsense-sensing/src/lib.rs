//! Camera capture, person detection and distance streaming.
//!
//! This crate provides:
//! - Frame capture from an FFmpeg child process
//! - YOLO person detection via ONNX Runtime, with IoU tracking
//! - Pinhole distance estimation with smoothing and calibration
//! - A demand-driven detection pipeline and its consumer fan-out
//! - Per-session distance recovery and adaptive JPEG previews

pub mod connection;
pub mod detection;
pub mod distance;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod pipeline;
pub mod recovery;
pub mod source;

#[cfg(test)]
mod test_support;

pub use connection::{ChannelConsumer, ConnectionManager, Consumer, ConsumerId, DeliveryError};
pub use detection::{DetectorLoader, InferenceParams, ObjectDetector, RawDetection, YoloLoader};
pub use distance::DistanceCalculator;
pub use encoder::{AdaptiveEncoder, EncodedPreview};
pub use error::{SensingError, SensingResult};
pub use frame::Frame;
pub use pipeline::{DetectionPipeline, PipelineState};
pub use recovery::{RecoveryOutput, RecoveryPhase, RecoveryState};
pub use source::{FfmpegSourceFactory, FrameSource, FrameSourceFactory};
