//! Artifact writer.
//!
//! One capture produces, in order:
//!
//! 1. `original/screenshots/<stem>.png`: the frame (or a padded crop of it)
//! 2. a `screenshots` row holding the original-resolution fields
//! 3. `resized/without_bbox/<stem>.jpg` (and optionally
//!    `resized/with_bbox/<stem>_bbox.jpg`)
//! 4. `original/labels/<stem>.txt` and `resized/labels/<stem>.txt`
//! 5. row updates for the resized fields and both labels
//!
//! where `<stem>` is `<class>_<class_id>_<confidence:.2>_<object_id>_<unix_ts>`.
//! A failure abandons the remaining steps; files already written stay on
//! disk and the row (if inserted) stays partially populated.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use regex::Regex;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::annotate::{draw_box, BOX_COLOR};
use crate::decision::CaptureAction;
use crate::error::{CaptureError, CaptureFailure};
use crate::frame::{resize_image, Frame};
use crate::geometry::{rescale, ImageShape, VocBox, YoloLabel};
use crate::storage::{CaptureRecord, CaptureStore, NewCapture, ResizedCapture};
use crate::tracker::StateSnapshot;
use crate::{DetectionEvent, ObjectId};

pub const DEFAULT_RESIZE_WIDTH: u32 = 1280;
pub const DEFAULT_RESIZE_HEIGHT: u32 = 720;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

// -------------------- Directory layout --------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub root: PathBuf,
    pub original_images: PathBuf,
    pub original_labels: PathBuf,
    pub resized_images: PathBuf,
    pub resized_bbox_images: PathBuf,
    pub resized_labels: PathBuf,
}

impl ArtifactLayout {
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            original_images: root.join("original").join("screenshots"),
            original_labels: root.join("original").join("labels"),
            resized_images: root.join("resized").join("without_bbox"),
            resized_bbox_images: root.join("resized").join("with_bbox"),
            resized_labels: root.join("resized").join("labels"),
        }
    }

    fn dirs(&self) -> [&Path; 5] {
        [
            &self.original_images,
            &self.original_labels,
            &self.resized_images,
            &self.resized_bbox_images,
            &self.resized_labels,
        ]
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in self.dirs() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create artifact directory {}", dir.display()))?;
        }
        Ok(())
    }
}

// -------------------- Settings --------------------

/// What the original image artifact contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureImage {
    FullFrame,
    /// Box grown by `padding` pixels per side, clipped to the frame. The
    /// stored box and shape are in crop coordinates.
    Crop { padding: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactSettings {
    pub layout: ArtifactLayout,
    pub resize: ImageShape,
    pub jpeg_quality: u8,
    pub write_bbox_copy: bool,
    pub capture_image: CaptureImage,
    pub clamp_boxes: bool,
}

impl ArtifactSettings {
    pub fn new(root: &Path) -> Self {
        Self {
            layout: ArtifactLayout::under(root),
            resize: ImageShape::new(DEFAULT_RESIZE_WIDTH, DEFAULT_RESIZE_HEIGHT),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            write_bbox_copy: true,
            capture_image: CaptureImage::FullFrame,
            clamp_boxes: false,
        }
    }
}

/// Artifact root directory name for the `index`-th configured source.
///
/// Object ids are only unique within one stream, so streams must never share
/// an artifact root. The index keeps names unique; the label is the source's
/// stub name or replay file stem.
pub fn stream_dir_name(index: usize, source: &str) -> String {
    let source = source.trim();
    let label = match source.split_once("://") {
        Some((_, rest)) => rest.split(['?', '/']).next().unwrap_or_default(),
        None => Path::new(source)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default(),
    };
    format!("{:02}-{}", index, sanitize_class_name(label))
}

// -------------------- Naming --------------------

fn unsafe_name_chars() -> &'static Regex {
    static UNSAFE_RE: OnceLock<Regex> = OnceLock::new();
    UNSAFE_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9-]").unwrap())
}

fn artifact_name_re() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| {
        Regex::new(
            r"^([A-Za-z0-9-]+)_(\d+)_(\d+\.\d{2})_(\d+)_(\d+)(?:_bbox)?(?:\.[A-Za-z0-9]+)?$",
        )
        .unwrap()
    })
}

/// Makes a class name safe for the `_`-delimited artifact name.
pub fn sanitize_class_name(name: &str) -> String {
    let safe = unsafe_name_chars().replace_all(name.trim(), "-");
    if safe.is_empty() {
        "unnamed".to_string()
    } else {
        safe.into_owned()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactName {
    pub class_name: String,
    pub class_id: u32,
    pub confidence: f32,
    pub object_id: ObjectId,
    pub timestamp: u64,
}

impl ArtifactName {
    pub fn new(
        class_name: &str,
        class_id: u32,
        confidence: f32,
        object_id: ObjectId,
        timestamp: u64,
    ) -> Self {
        Self {
            class_name: sanitize_class_name(class_name),
            class_id,
            confidence,
            object_id,
            timestamp,
        }
    }

    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{:.2}_{}_{}",
            self.class_name, self.class_id, self.confidence, self.object_id, self.timestamp
        )
    }

    pub fn file_name(&self, ext: &str) -> String {
        format!("{}.{}", self.stem(), ext)
    }

    /// Recovers the name fields from an artifact file name (with or without
    /// extension or `_bbox` suffix). Confidence comes back rounded.
    pub fn parse(file_name: &str) -> Result<Self> {
        let caps = artifact_name_re()
            .captures(file_name)
            .ok_or_else(|| anyhow!("not an artifact file name: {:?}", file_name))?;
        Ok(Self {
            class_name: caps[1].to_string(),
            class_id: caps[2].parse()?,
            confidence: caps[3].parse()?,
            object_id: ObjectId(caps[4].parse()?),
            timestamp: caps[5].parse()?,
        })
    }
}

// -------------------- Writer --------------------

/// Everything the writer needs for one capture.
pub struct CaptureRequest<'a> {
    pub action: CaptureAction,
    pub object_id: ObjectId,
    pub event: &'a DetectionEvent,
    /// State right after the observation that triggered the capture.
    pub snapshot: &'a StateSnapshot,
    pub frame: &'a Frame,
    pub class_name: &'a str,
}

pub struct ArtifactWriter {
    settings: ArtifactSettings,
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn write_png(image: &RgbImage, path: &Path) -> Result<(), CaptureError> {
    ensure_parent(path).map_err(|e| CaptureError::artifact_write(path, e))?;
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| CaptureError::artifact_write(path, e))
}

fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<(), CaptureError> {
    let write = || -> Result<()> {
        ensure_parent(path)?;
        let mut out = BufWriter::new(File::create(path)?);
        let encoder = JpegEncoder::new_with_quality(&mut out, quality);
        image.write_with_encoder(encoder)?;
        out.flush()?;
        Ok(())
    };
    write().map_err(|e| CaptureError::artifact_write(path, e))
}

fn write_label(label: &YoloLabel, path: &Path) -> Result<(), CaptureError> {
    ensure_parent(path)
        .and_then(|_| std::fs::write(path, format!("{}\n", label)))
        .map_err(|e| CaptureError::artifact_write(path, e))
}

impl ArtifactWriter {
    /// Creates the output directories. Failure here is a startup failure.
    pub fn new(settings: ArtifactSettings) -> Result<Self> {
        settings.layout.ensure_dirs()?;
        settings.resize.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ArtifactSettings {
        &self.settings
    }

    /// Image, box and shape the record describes.
    fn subject<'f>(
        &self,
        frame: &'f Frame,
        bbox: &VocBox,
    ) -> (Cow<'f, RgbImage>, VocBox, ImageShape) {
        match self.settings.capture_image {
            CaptureImage::FullFrame => (Cow::Borrowed(frame.image()), *bbox, frame.shape()),
            CaptureImage::Crop { padding } => {
                let region = frame.crop_region(bbox, padding);
                (
                    Cow::Owned(frame.crop(&region)),
                    region.to_local(bbox),
                    region.shape(),
                )
            }
        }
    }

    /// Runs the full capture. On failure, [`CaptureFailure::record_id`] tells
    /// the caller whether a row was already inserted.
    pub fn capture<S: CaptureStore + ?Sized>(
        &self,
        store: &mut S,
        request: &CaptureRequest<'_>,
    ) -> Result<CaptureRecord, CaptureFailure> {
        let event = request.event;
        let layout = &self.settings.layout;

        let frame_shape = request.frame.shape();
        frame_shape.validate().map_err(CaptureFailure::before_insert)?;
        event
            .frame_shape()
            .validate()
            .map_err(CaptureFailure::before_insert)?;
        if frame_shape != event.frame_shape() {
            return Err(CaptureFailure::before_insert(CaptureError::InvalidDetection(
                format!(
                    "frame is {} but detection reports {}",
                    frame_shape,
                    event.frame_shape()
                ),
            )));
        }

        let name = ArtifactName::new(
            request.class_name,
            event.class_id,
            event.confidence,
            request.object_id,
            event.timestamp,
        );
        let stem = name.stem();

        let (image, bbox, shape) = self.subject(request.frame, &event.bbox);
        let bbox = if self.settings.clamp_boxes {
            bbox.clamped(shape)
        } else {
            bbox
        };
        shape.validate().map_err(CaptureFailure::before_insert)?;

        let original_path = layout.original_images.join(name.file_name("png"));
        write_png(&image, &original_path).map_err(CaptureFailure::before_insert)?;

        let record_id = store
            .insert_original(&NewCapture {
                class_name: name.class_name.clone(),
                class_id: event.class_id,
                confidence: event.confidence,
                object_id: request.object_id,
                timestamp: event.timestamp,
                screenshot_path: path_string(&original_path),
                original_box: bbox,
                original_shape: shape,
                frame_count: request.snapshot.frame_count,
                frames_since_last_capture: request.snapshot.frames_since_last_capture,
            })
            .map_err(|e| {
                CaptureFailure::before_insert(CaptureError::persistence("insert_original", e))
            })?;
        log::info!(
            "{} capture of object {} saved to {} (record {})",
            request.action.as_str(),
            request.object_id,
            original_path.display(),
            record_id
        );

        let after = |error: CaptureError| CaptureFailure::after_insert(record_id, error);
        let target = self.settings.resize;

        let resized = resize_image(&image, target);
        let resized_path = layout.resized_images.join(format!("{}.jpg", stem));
        write_jpeg(&resized, &resized_path, self.settings.jpeg_quality).map_err(after)?;

        let resized_box = rescale(&bbox, shape, target).map_err(after)?;

        if self.settings.write_bbox_copy {
            let mut boxed = resized;
            draw_box(&mut boxed, &resized_box, BOX_COLOR);
            let boxed_path = layout.resized_bbox_images.join(format!("{}_bbox.jpg", stem));
            write_jpeg(&boxed, &boxed_path, self.settings.jpeg_quality).map_err(after)?;
        }

        store
            .update_resized(
                record_id,
                &ResizedCapture {
                    screenshot_path: path_string(&resized_path),
                    bbox: resized_box,
                    shape: target,
                },
            )
            .map_err(|e| after(CaptureError::persistence("update_resized", e)))?;

        let original_label = YoloLabel::from_box(event.class_id, &bbox, shape).map_err(after)?;
        let resized_label =
            YoloLabel::from_box(event.class_id, &resized_box, target).map_err(after)?;

        write_label(
            &original_label,
            &layout.original_labels.join(format!("{}.txt", stem)),
        )
        .map_err(after)?;
        write_label(
            &resized_label,
            &layout.resized_labels.join(format!("{}.txt", stem)),
        )
        .map_err(after)?;

        store
            .update_labels(record_id, &original_label.bbox, &resized_label.bbox)
            .map_err(|e| after(CaptureError::persistence("update_labels", e)))?;

        log::debug!(
            "object {} labels: original [{}] resized [{}]",
            request.object_id,
            original_label,
            resized_label
        );

        store
            .get(record_id)
            .map_err(|e| after(CaptureError::persistence("get", e)))?
            .ok_or_else(|| {
                after(CaptureError::persistence(
                    "get",
                    anyhow!("record {} vanished after update", record_id),
                ))
            })
    }
}
