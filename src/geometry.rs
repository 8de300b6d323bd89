//! Coordinate transforms between absolute (VOC) boxes and normalized (YOLO)
//! labels, and between image resolutions.
//!
//! Everything here is pure. Boxes are never clamped implicitly: a box that
//! pokes out of its frame rescales to a box that pokes out of the resized
//! frame. Callers that want clamping use [`VocBox::clamped`].

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CaptureError;

/// Absolute pixel box `(x1, y1, x2, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VocBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl VocBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// `x1 < x2` and `y1 < y2`, all finite.
    pub fn is_ordered(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    pub fn is_within(&self, shape: ImageShape) -> bool {
        self.x1 >= 0.0
            && self.y1 >= 0.0
            && self.x2 <= shape.width as f64
            && self.y2 <= shape.height as f64
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Clips the box to the image bounds.
    pub fn clamped(&self, shape: ImageShape) -> Self {
        let w = shape.width as f64;
        let h = shape.height as f64;
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }
}

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: u32,
    pub height: u32,
}

impl ImageShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::InvalidShape {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Box as center/size fractions of the image dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

pub fn to_normalized(bbox: &VocBox, shape: ImageShape) -> Result<NormalizedBox, CaptureError> {
    shape.validate()?;
    let w = shape.width as f64;
    let h = shape.height as f64;
    Ok(NormalizedBox {
        x_center: (bbox.x1 + bbox.x2) / (2.0 * w),
        y_center: (bbox.y1 + bbox.y2) / (2.0 * h),
        width: (bbox.x2 - bbox.x1) / w,
        height: (bbox.y2 - bbox.y1) / h,
    })
}

/// Inverse of [`to_normalized`].
pub fn from_normalized(norm: &NormalizedBox, shape: ImageShape) -> Result<VocBox, CaptureError> {
    shape.validate()?;
    let w = shape.width as f64;
    let h = shape.height as f64;
    let half_w = norm.width * w / 2.0;
    let half_h = norm.height * h / 2.0;
    let cx = norm.x_center * w;
    let cy = norm.y_center * h;
    Ok(VocBox::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h))
}

/// Maps a box from one resolution to another with independent x/y factors.
pub fn rescale(bbox: &VocBox, from: ImageShape, to: ImageShape) -> Result<VocBox, CaptureError> {
    from.validate()?;
    to.validate()?;
    let sx = to.width as f64 / from.width as f64;
    let sy = to.height as f64 / from.height as f64;
    Ok(VocBox::new(
        bbox.x1 * sx,
        bbox.y1 * sy,
        bbox.x2 * sx,
        bbox.y2 * sy,
    ))
}

// -------------------- YOLO label lines --------------------

/// One line of a YOLO label file: `<class_id> <x_center> <y_center> <width> <height>`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct YoloLabel {
    pub class_id: u32,
    pub bbox: NormalizedBox,
}

impl YoloLabel {
    pub fn from_box(class_id: u32, bbox: &VocBox, shape: ImageShape) -> Result<Self, CaptureError> {
        Ok(Self {
            class_id,
            bbox: to_normalized(bbox, shape)?,
        })
    }

    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// Parses one label line. Accepts `0` or `0.0` for the class id.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(anyhow!(
                "label line must have 5 fields, got {}: {:?}",
                fields.len(),
                line
            ));
        }
        let mut values = [0f64; 5];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field
                .parse::<f64>()
                .map_err(|e| anyhow!("invalid label field {:?}: {}", field, e))?;
        }
        let class = values[0];
        if class < 0.0 || class.fract() != 0.0 || class > u32::MAX as f64 {
            return Err(anyhow!("invalid class id {:?}", fields[0]));
        }
        Ok(Self {
            class_id: class as u32,
            bbox: NormalizedBox {
                x_center: values[1],
                y_center: values[2],
                width: values[3],
                height: values[4],
            },
        })
    }
}

impl fmt::Display for YoloLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.class_id,
            self.bbox.x_center,
            self.bbox.y_center,
            self.bbox.width,
            self.bbox.height
        )
    }
}
