//! Raw RGB frames.

use image::{imageops, ImageBuffer, Rgb, RgbImage};
use nearsense_models::Rotation;

use crate::error::{SensingError, SensingResult};

/// A captured frame, tightly packed RGB8.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Monotonic per-source sequence number
    pub sequence: u64,
}

impl Frame {
    /// Create a frame, checking the buffer length against the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>, sequence: u64) -> SensingResult<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(SensingError::invalid_frame(format!(
                "expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            sequence,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Borrow the pixels as an image buffer.
    pub fn to_image(&self) -> SensingResult<RgbImage> {
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| SensingError::invalid_frame("buffer does not match dimensions"))
    }

    /// Rotate clockwise by the configured amount.
    pub fn rotate(self, rotation: Rotation) -> SensingResult<Self> {
        let rotated = match rotation {
            Rotation::None => return Ok(self),
            Rotation::Cw90 => imageops::rotate90(&self.to_image()?),
            Rotation::Cw180 => imageops::rotate180(&self.to_image()?),
            Rotation::Cw270 => imageops::rotate270(&self.to_image()?),
        };
        let (width, height) = rotated.dimensions();
        Ok(Self {
            width,
            height,
            data: rotated.into_raw(),
            sequence: self.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(width: u32, height: u32) -> Frame {
        let data = (0..width * height)
            .flat_map(|i| [i as u8, 0, 0])
            .collect();
        Frame::new(width, height, data, 7).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_length() {
        assert!(Frame::new(2, 2, vec![0; 11], 0).is_err());
        assert!(Frame::new(2, 2, vec![0; 12], 0).is_ok());
    }

    #[test]
    fn test_rotate_90_swaps_dimensions() {
        // 3x2 frame, pixels numbered row-major:
        // 0 1 2
        // 3 4 5
        let rotated = numbered(3, 2).rotate(Rotation::Cw90).unwrap();
        assert_eq!((rotated.width, rotated.height), (2, 3));
        assert_eq!(rotated.sequence, 7);
        // Clockwise: top row becomes 3 0
        assert_eq!(rotated.data[0], 3);
        assert_eq!(rotated.data[3], 0);
    }

    #[test]
    fn test_rotate_180_and_identity() {
        let frame = numbered(3, 2);
        let same = frame.clone().rotate(Rotation::None).unwrap();
        assert_eq!(same, frame);

        let flipped = frame.rotate(Rotation::Cw180).unwrap();
        assert_eq!((flipped.width, flipped.height), (3, 2));
        assert_eq!(flipped.data[0], 5);
    }
}
