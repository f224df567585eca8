//! Distance-driven JPEG preview encoding.
//!
//! A nearer subject gets a sharper (wider) preview. With dynamic quality
//! enabled, JPEG quality rises with distance, so near frames are large
//! but cheap.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use nearsense_models::{DistanceMappingConfig, Resolution, StreamingConfig};
use tracing::debug;

use crate::error::{SensingError, SensingResult};
use crate::frame::Frame;
use crate::metrics;

/// Accepted source and target width range.
pub const WIDTH_BOUNDS: (u32, u32) = (16, 7680);
/// Accepted source and target height range.
pub const HEIGHT_BOUNDS: (u32, u32) = (16, 4320);

/// One encoded preview image.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPreview {
    /// Base64 JPEG
    pub image: String,
    pub resolution: Resolution,
    pub quality: u8,
}

/// Picks preview resolution and quality from distance, then encodes.
#[derive(Debug, Clone)]
pub struct AdaptiveEncoder {
    streaming: StreamingConfig,
    mapping: DistanceMappingConfig,
}

impl AdaptiveEncoder {
    pub fn new(streaming: StreamingConfig, mapping: DistanceMappingConfig) -> Self {
        Self { streaming, mapping }
    }

    /// Position of `distance` within the mapping range, in [0, 1].
    fn ratio(&self, distance: f64) -> f64 {
        let (min, max) = (self.mapping.min_distance, self.mapping.max_distance);
        let span = max - min;
        if span <= 0.0 {
            return 0.0;
        }
        ((distance.clamp(min, max) - min) / span).clamp(0.0, 1.0)
    }

    /// Preview size for a distance. No subject (0) gets the maximum.
    pub fn target_resolution(&self, distance: f64) -> Resolution {
        let max_w = f64::from(self.streaming.max_resolution_width);
        let min_w = f64::from(self.streaming.min_resolution_width);

        let width = if distance <= 0.0 {
            max_w
        } else {
            (max_w - self.ratio(distance) * (max_w - min_w)).round()
        };

        let width = even(width as u32);
        let height = even(width * 9 / 16);
        Resolution::new(width, height)
    }

    /// JPEG quality for a distance. No subject (0) gets the maximum.
    pub fn target_quality(&self, distance: f64) -> u8 {
        let min_q = f64::from(self.streaming.min_quality);
        let max_q = f64::from(self.streaming.max_quality);
        if distance <= 0.0 {
            return self.streaming.max_quality;
        }
        (min_q + self.ratio(distance) * (max_q - min_q))
            .round()
            .clamp(1.0, 100.0) as u8
    }

    /// Encode a preview of `frame` for `distance`.
    ///
    /// Returns `None` when the frame is unusable or encoding fails; the
    /// caller skips that tick.
    pub fn encode(&self, frame: &Frame, distance: f64) -> Option<EncodedPreview> {
        match self.try_encode(frame, distance) {
            Ok(preview) => Some(preview),
            Err(e) => {
                debug!(error = %e, "Preview encode skipped");
                metrics::record_encode_failure();
                None
            }
        }
    }

    fn try_encode(&self, frame: &Frame, distance: f64) -> SensingResult<EncodedPreview> {
        if frame.is_empty() {
            return Err(SensingError::invalid_frame("empty frame"));
        }
        check_bounds(frame.width, frame.height)?;

        let (resolution, quality) = if self.streaming.enable_dynamic_resolution {
            let quality = if self.streaming.enable_dynamic_quality {
                self.target_quality(distance)
            } else {
                self.streaming.jpeg_quality
            };
            let target = self.target_resolution(distance);
            (fit_within(target, frame.width, frame.height), quality)
        } else {
            (
                Resolution::new(frame.width, frame.height),
                self.streaming.jpeg_quality,
            )
        };
        check_bounds(resolution.width, resolution.height)?;

        let source = frame.to_image()?;
        let resized = if (resolution.width, resolution.height) == (frame.width, frame.height) {
            source
        } else {
            imageops::resize(&source, resolution.width, resolution.height, FilterType::Triangle)
        };

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode_image(&resized)
            .map_err(|e| SensingError::internal(format!("JPEG encode failed: {}", e)))?;

        Ok(EncodedPreview {
            image: base64::engine::general_purpose::STANDARD.encode(&buffer),
            resolution,
            quality,
        })
    }
}

fn even(value: u32) -> u32 {
    value & !1
}

/// Shrink `target` to fit the source, keeping its aspect. Never upscales.
fn fit_within(target: Resolution, width: u32, height: u32) -> Resolution {
    if target.width <= width && target.height <= height {
        return target;
    }
    let scale = (f64::from(width) / f64::from(target.width))
        .min(f64::from(height) / f64::from(target.height));
    Resolution::new(
        even((f64::from(target.width) * scale).round() as u32),
        even((f64::from(target.height) * scale).round() as u32),
    )
}

fn check_bounds(width: u32, height: u32) -> SensingResult<()> {
    let width_ok = (WIDTH_BOUNDS.0..=WIDTH_BOUNDS.1).contains(&width);
    let height_ok = (HEIGHT_BOUNDS.0..=HEIGHT_BOUNDS.1).contains(&height);
    if width_ok && height_ok {
        Ok(())
    } else {
        Err(SensingError::invalid_frame(format!(
            "dimensions {}x{} out of range",
            width, height
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> AdaptiveEncoder {
        AdaptiveEncoder::new(StreamingConfig::default(), DistanceMappingConfig::default())
    }

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height)
            .flat_map(|i| [(i % 251) as u8, (i % 97) as u8, 128])
            .collect();
        Frame::new(width, height, data, 1).unwrap()
    }

    #[test]
    fn test_resolution_endpoints() {
        let enc = encoder();
        assert_eq!(enc.target_resolution(50.0), Resolution::new(1920, 1080));
        assert_eq!(enc.target_resolution(500.0), Resolution::new(320, 180));
        assert_eq!(enc.target_resolution(0.0), Resolution::new(1920, 1080));
        // clamped
        assert_eq!(enc.target_resolution(10.0), Resolution::new(1920, 1080));
        assert_eq!(enc.target_resolution(2000.0), Resolution::new(320, 180));
        // midpoint
        assert_eq!(enc.target_resolution(275.0), Resolution::new(1120, 630));
    }

    #[test]
    fn test_resolution_even_and_monotonic() {
        let enc = AdaptiveEncoder::new(
            StreamingConfig {
                min_resolution_width: 333,
                max_resolution_width: 1001,
                ..Default::default()
            },
            DistanceMappingConfig::default(),
        );

        let mut prev_width = u32::MAX;
        let mut d = 50.0;
        while d <= 500.0 {
            let res = enc.target_resolution(d);
            assert_eq!(res.width % 2, 0, "odd width at {}", d);
            assert_eq!(res.height % 2, 0, "odd height at {}", d);
            assert!(res.width <= prev_width);
            prev_width = res.width;
            d += 7.5;
        }
    }

    #[test]
    fn test_quality_mapping() {
        let enc = encoder();
        assert_eq!(enc.target_quality(50.0), 30);
        assert_eq!(enc.target_quality(500.0), 85);
        assert_eq!(enc.target_quality(0.0), 85);
        assert_eq!(enc.target_quality(275.0), 58);
        assert!(enc.target_quality(100.0) <= enc.target_quality(300.0));
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let enc = encoder();
        let preview = enc.encode(&gradient(640, 360), 500.0).unwrap();
        assert_eq!(preview.resolution, Resolution::new(320, 180));
        assert_eq!(preview.quality, 70);

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&preview.image)
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encode_dynamic_quality() {
        let enc = AdaptiveEncoder::new(
            StreamingConfig {
                enable_dynamic_quality: true,
                ..Default::default()
            },
            DistanceMappingConfig::default(),
        );
        let preview = enc.encode(&gradient(64, 36), 50.0).unwrap();
        assert_eq!(preview.quality, 30);
        assert_eq!(preview.resolution, Resolution::new(64, 36));
    }

    #[test]
    fn test_near_subject_never_upscales() {
        let enc = encoder();
        let preview = enc.encode(&gradient(1280, 720), 50.0).unwrap();
        assert_eq!(preview.resolution, Resolution::new(1280, 720));

        // odd native sizes still give even output
        let preview = enc.encode(&gradient(641, 361), 0.0).unwrap();
        assert_eq!(preview.resolution.width % 2, 0);
        assert_eq!(preview.resolution.height % 2, 0);
        assert!(preview.resolution.width <= 641);
        assert!(preview.resolution.height <= 361);

        let preview = enc.encode(&gradient(1280, 720), 275.0).unwrap();
        assert_eq!(preview.resolution, Resolution::new(1120, 630));
    }

    #[test]
    fn test_fixed_mode_keeps_native_size() {
        let enc = AdaptiveEncoder::new(
            StreamingConfig {
                enable_dynamic_resolution: false,
                jpeg_quality: 60,
                ..Default::default()
            },
            DistanceMappingConfig::default(),
        );
        let preview = enc.encode(&gradient(64, 36), 120.0).unwrap();
        assert_eq!(preview.resolution, Resolution::new(64, 36));
        assert_eq!(preview.quality, 60);
    }

    #[test]
    fn test_encode_rejects_bad_frames() {
        let enc = encoder();
        let empty = Frame {
            width: 0,
            height: 0,
            data: Vec::new(),
            sequence: 0,
        };
        assert!(enc.encode(&empty, 100.0).is_none());
        assert!(enc.encode(&gradient(8, 8), 100.0).is_none());
    }
}
