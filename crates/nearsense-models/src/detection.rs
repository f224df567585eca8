//! Per-frame detection results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Create a box from its corners.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Check that the corners are ordered (x1 < x2, y1 < y2).
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Intersection over Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// A detected person with its estimated distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Stable identifier assigned by the tracker, if any
    pub track_id: Option<u32>,
    /// Estimated distance in centimeters, one decimal place
    pub distance: f64,
    pub bbox: BoundingBox,
    /// Detector confidence (0-1)
    pub confidence: f64,
}

/// Aggregated result of one detector pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultFrame {
    pub detections: Vec<Detection>,
    /// Frames completed in the current one-second window
    pub fps: u32,
    /// Reciprocal of the mean per-frame latency
    pub actual_fps: u32,
    pub closest_distance: f64,
    pub total_count: usize,
    /// Unix timestamp in seconds
    pub timestamp: f64,
}

impl ResultFrame {
    /// Build a frame from detections, deriving count and closest distance.
    pub fn from_detections(detections: Vec<Detection>, timestamp: f64) -> Self {
        let closest_distance = closest_distance(&detections);
        Self {
            total_count: detections.len(),
            closest_distance,
            detections,
            fps: 0,
            actual_fps: 0,
            timestamp,
        }
    }
}

/// Minimum distance over the detections, or 0 when there are none.
pub fn closest_distance(detections: &[Detection]) -> f64 {
    detections
        .iter()
        .map(|d| d.distance)
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(0.0)
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
