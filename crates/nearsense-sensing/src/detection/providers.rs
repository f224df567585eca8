//! Detector traits.
//!
//! Both traits are synchronous; the pipeline runs them on the blocking
//! pool so model loading and inference never stall the async runtime.

use std::sync::Arc;

use nearsense_models::{BoundingBox, ModelConfig};

use crate::error::SensingResult;
use crate::frame::Frame;

/// One detected person before distance estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Pixel box in the (rotated) frame
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub track_id: Option<u32>,
}

/// Per-call inference thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
    pub conf: f32,
    pub iou: f32,
}

impl From<&ModelConfig> for InferenceParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            conf: config.conf,
            iou: config.iou,
        }
    }
}

/// Person detector.
pub trait ObjectDetector: Send + Sync {
    /// Detect people in a frame.
    fn infer(&self, frame: &Frame, params: &InferenceParams) -> SensingResult<Vec<RawDetection>>;

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Builds detectors. Loading may take seconds.
pub trait DetectorLoader: Send + Sync {
    fn load(&self, config: &ModelConfig) -> SensingResult<Arc<dyn ObjectDetector>>;
}
