//! Person detection.
//!
//! | Component | Role |
//! |-----------|------|
//! | `ObjectDetector` | Boxes + confidences (+ optional track ids) per frame |
//! | `DetectorLoader` | Builds a detector from `ModelConfig`, blocking |
//! | `YoloPersonDetector` | ONNX Runtime YOLO, person class only |
//! | `IoUTracker` | Greedy IoU association for stable track ids |

pub mod object_detector;
pub mod providers;
pub mod tracker;

pub use object_detector::{YoloLoader, YoloPersonDetector};
pub use providers::{DetectorLoader, InferenceParams, ObjectDetector, RawDetection};
pub use tracker::IoUTracker;
