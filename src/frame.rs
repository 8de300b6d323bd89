//! Frame container.
//!
//! - `Frame`: owned RGB pixel buffer for one processed video frame.
//! - `CropRegion`: integer pixel window cut out of a frame for crop captures.
//!
//! Frames are produced by the ingest layer and borrowed by the artifact
//! writer. There is deliberately no `Clone`: a batch owns its frame and the
//! pipeline only ever reads it.

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

use crate::geometry::{ImageShape, VocBox};

pub struct Frame {
    image: RgbImage,
    /// Capture time, seconds since epoch.
    pub timestamp_s: u64,
}

impl Frame {
    /// Wraps a packed RGB24 buffer. Length must be `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, timestamp_s: u64) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB frame buffer rejected ({}x{})", width, height))?;
        Ok(Self { image, timestamp_s })
    }

    pub fn from_image(image: RgbImage, timestamp_s: u64) -> Self {
        Self { image, timestamp_s }
    }

    /// Decodes an image file (any format the `image` crate was built with).
    pub fn open(path: &Path, timestamp_s: u64) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgb8();
        Ok(Self { image, timestamp_s })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.image.width(), self.image.height())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Raw byte length (for memory accounting).
    pub fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }

    /// Resizes to `shape` with a triangle filter.
    pub fn resized(&self, shape: ImageShape) -> RgbImage {
        resize_image(&self.image, shape)
    }

    /// Integer window around `bbox` grown by `padding` pixels and clipped to
    /// the frame. Never empty for a frame with non-zero dimensions.
    pub fn crop_region(&self, bbox: &VocBox, padding: u32) -> CropRegion {
        let w = self.width() as f64;
        let h = self.height() as f64;
        let pad = padding as f64;
        let x0 = (bbox.x1 - pad).floor().clamp(0.0, (w - 1.0).max(0.0));
        let y0 = (bbox.y1 - pad).floor().clamp(0.0, (h - 1.0).max(0.0));
        let x1 = (bbox.x2 + pad).ceil().clamp(x0 + 1.0, w.max(x0 + 1.0));
        let y1 = (bbox.y2 + pad).ceil().clamp(y0 + 1.0, h.max(y0 + 1.0));
        CropRegion {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        }
    }

    pub fn crop(&self, region: &CropRegion) -> RgbImage {
        imageops::crop_imm(&self.image, region.x, region.y, region.width, region.height).to_image()
    }
}

/// Pixel window inside a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.width, self.height)
    }

    /// Expresses a frame-space box in crop coordinates.
    pub fn to_local(&self, bbox: &VocBox) -> VocBox {
        bbox.translated(-(self.x as f64), -(self.y as f64))
    }
}

pub fn resize_image(image: &RgbImage, shape: ImageShape) -> RgbImage {
    imageops::resize(image, shape.width, shape.height, FilterType::Triangle)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(width: u32, height: u32) -> Frame {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        Frame::from_rgb(data, width, height, 0).unwrap()
    }

    #[test]
    fn rgb_length_is_validated() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2, 0).is_err());
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 5).unwrap();
        assert_eq!(frame.shape(), ImageShape::new(2, 2));
        assert_eq!(frame.byte_len(), 12);
        assert_eq!(frame.timestamp_s, 5);
    }

    #[test]
    fn resize_produces_target_shape() {
        let frame = make_test_frame(64, 48);
        let resized = frame.resized(ImageShape::new(32, 18));
        assert_eq!(resized.dimensions(), (32, 18));
    }

    #[test]
    fn crop_region_pads_and_clips() {
        let frame = make_test_frame(100, 80);
        let region = frame.crop_region(&VocBox::new(10.4, 20.0, 30.2, 79.5), 5);
        assert_eq!(
            region,
            CropRegion {
                x: 5,
                y: 15,
                width: 31,
                height: 65
            }
        );
        let crop = frame.crop(&region);
        assert_eq!(crop.dimensions(), (31, 65));

        let local = region.to_local(&VocBox::new(10.4, 20.0, 30.2, 79.5));
        assert!((local.x1 - 5.4).abs() < 1e-9);
        assert!((local.y1 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn crop_region_is_never_empty() {
        let frame = make_test_frame(10, 10);
        let region = frame.crop_region(&VocBox::new(50.0, 50.0, 60.0, 60.0), 0);
        assert!(region.width >= 1 && region.height >= 1);
        assert!(region.x + region.width <= 10);
        assert!(region.y + region.height <= 10);
    }
}
