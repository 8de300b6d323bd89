//! Box overlays.
//!
//! Used for the resized "with bbox" artifact and by `label_check`, which
//! draws label files back onto their images for visual inspection.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

use crate::geometry::{from_normalized, ImageShape, VocBox, YoloLabel};

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const CENTER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;

/// Draws a `BOX_THICKNESS` pixel rectangle. Parts outside the image are
/// clipped; a box entirely outside draws nothing.
pub fn draw_box(image: &mut RgbImage, bbox: &VocBox, color: Rgb<u8>) {
    let x = bbox.x1.round() as i32;
    let y = bbox.y1.round() as i32;
    let w = bbox.width().round() as i32;
    let h = bbox.height().round() as i32;
    for inset in 0..BOX_THICKNESS {
        let (rw, rh) = (w - 2 * inset, h - 2 * inset);
        if rw <= 0 || rh <= 0 {
            break;
        }
        let rect = Rect::at(x + inset, y + inset).of_size(rw as u32, rh as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Draws a label's box plus a dot on its center.
pub fn draw_label(image: &mut RgbImage, label: &YoloLabel) -> Result<()> {
    let shape = ImageShape::new(image.width(), image.height());
    let bbox = from_normalized(&label.bbox, shape)?;
    draw_box(image, &bbox, BOX_COLOR);
    let cx = (label.bbox.x_center * shape.width as f64).round() as i32;
    let cy = (label.bbox.y_center * shape.height as f64).round() as i32;
    draw_filled_circle_mut(image, (cx, cy), 3, CENTER_COLOR);
    Ok(())
}

pub fn read_labels(path: &Path) -> Result<Vec<YoloLabel>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label file {}", path.display()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            YoloLabel::parse_line(line).with_context(|| format!("in {}", path.display()))
        })
        .collect()
}

/// Result of [`annotate_directory`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotateReport {
    pub annotated: usize,
    /// Images without a matching `.txt` file.
    pub missing_labels: Vec<PathBuf>,
    /// Images or label files that could not be processed.
    pub failed: Vec<PathBuf>,
}

fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

/// Draws every `labels_dir/<stem>.txt` onto `images_dir/<stem>.<ext>` and
/// writes the result as PNG into `out_dir`.
pub fn annotate_directory(
    images_dir: &Path,
    labels_dir: &Path,
    out_dir: &Path,
) -> Result<AnnotateReport> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut entries = std::fs::read_dir(images_dir)
        .with_context(|| format!("failed to read {}", images_dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_image(path))
        .collect::<Vec<_>>();
    entries.sort();

    let mut report = AnnotateReport::default();
    for image_path in entries {
        let stem = image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("non UTF-8 file name {}", image_path.display()))?;
        let label_path = labels_dir.join(format!("{}.txt", stem));
        if !label_path.is_file() {
            log::warn!("no label file for {}", image_path.display());
            report.missing_labels.push(image_path);
            continue;
        }
        let out_path = out_dir.join(format!("{}.png", stem));
        match annotate_one(&image_path, &label_path, &out_path) {
            Ok(()) => {
                log::debug!("annotated {}", out_path.display());
                report.annotated += 1;
            }
            Err(e) => {
                log::warn!("failed to annotate {}: {:#}", image_path.display(), e);
                report.failed.push(image_path);
            }
        }
    }
    Ok(report)
}

fn annotate_one(image_path: &Path, label_path: &Path, out_path: &Path) -> Result<()> {
    let mut image = image::open(image_path)
        .with_context(|| format!("failed to decode {}", image_path.display()))?
        .to_rgb8();
    for label in read_labels(label_path)? {
        draw_label(&mut image, &label)?;
    }
    image
        .save_with_format(out_path, ImageFormat::Png)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    Ok(())
}
