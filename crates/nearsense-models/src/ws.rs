//! WebSocket message types.
//!
//! `/ws/detection` streams [`ResultFrame`](crate::ResultFrame) values as-is;
//! the other streams use the tagged [`StreamMessage`] envelope.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::round1;

/// Pixel dimensions of an encoded preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Stream message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Recovery-shaped distance for the live stream
    DistanceData {
        distance: f64,
        total_count: usize,
        timestamp: f64,
        is_recovering: bool,
    },

    /// Adaptive preview image for the flur stream
    FrameData {
        /// Base64 JPEG
        image: String,
        distance: f64,
        total_count: usize,
        timestamp: f64,
        resolution: Resolution,
        /// JPEG quality used (1-100)
        quality: u8,
    },

    /// Fatal session error, sent before the socket closes
    Error { message: String, timestamp: f64 },
}

impl StreamMessage {
    /// Create a distance message.
    pub fn distance_data(
        distance: f64,
        total_count: usize,
        timestamp: f64,
        is_recovering: bool,
    ) -> Self {
        StreamMessage::DistanceData {
            distance: round1(distance),
            total_count,
            timestamp,
            is_recovering,
        }
    }

    /// Create a preview frame message.
    pub fn frame_data(
        image: String,
        distance: f64,
        total_count: usize,
        timestamp: f64,
        resolution: Resolution,
        quality: u8,
    ) -> Self {
        StreamMessage::FrameData {
            image,
            distance: round1(distance),
            total_count,
            timestamp,
            resolution,
            quality,
        }
    }

    /// Create an error message stamped with the current time.
    pub fn error(message: impl Into<String>) -> Self {
        StreamMessage::Error {
            message: message.into(),
            timestamp: unix_timestamp(),
        }
    }
}

/// Current wall-clock time as fractional unix seconds.
pub fn unix_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_data_serialization() {
        let msg = StreamMessage::distance_data(267.4479, 0, 12.5, true);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "distance_data");
        assert_eq!(json["distance"], 267.4);
        assert_eq!(json["total_count"], 0);
        assert_eq!(json["is_recovering"], true);
    }

    #[test]
    fn test_frame_data_serialization() {
        let msg = StreamMessage::frame_data(
            "abc".to_string(),
            120.0,
            2,
            1.0,
            Resolution::new(640, 360),
            55,
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"frame_data\""));
        assert!(json.contains("\"resolution\":{\"width\":640,\"height\":360}"));
        assert!(json.contains("\"quality\":55"));
    }

    #[test]
    fn test_error_message() {
        let msg = StreamMessage::error("camera unavailable");
        match msg {
            StreamMessage::Error { message, timestamp } => {
                assert_eq!(message, "camera unavailable");
                assert!(timestamp > 0.0);
            }
            _ => panic!("Expected Error message"),
        }
    }
}
