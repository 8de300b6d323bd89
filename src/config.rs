use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::artifacts::{
    stream_dir_name, ArtifactLayout, ArtifactSettings, CaptureImage, DEFAULT_JPEG_QUALITY,
    DEFAULT_RESIZE_HEIGHT, DEFAULT_RESIZE_WIDTH,
};
use crate::decision::Thresholds;
use crate::geometry::ImageShape;

const DEFAULT_DB_PATH: &str = "database/database.db";
const DEFAULT_OUTPUT_DIR: &str = "screenshots";
const DEFAULT_SOURCE: &str = "stub://front_camera?frames=300";
const DEFAULT_CLASSES: [&str; 2] = ["bird", "squirrel"];
const DEFAULT_CROP_PADDING: u32 = 16;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    db_path: Option<String>,
    output_dir: Option<PathBuf>,
    log_file: Option<PathBuf>,
    classes: Option<Vec<String>>,
    sources: Option<Vec<String>>,
    stats_interval_secs: Option<u64>,
    thresholds: Option<ThresholdsConfigFile>,
    resize: Option<ResizeConfigFile>,
    capture: Option<CaptureModeConfigFile>,
    tracker: Option<TrackerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdsConfigFile {
    ss_confidence: Option<f32>,
    frame_count: Option<u32>,
    additional_frame: Option<u32>,
    max_screenshots: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ResizeConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
    write_bbox_copy: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureModeConfigFile {
    /// `full` or `crop`.
    image: Option<String>,
    crop_padding: Option<u32>,
    clamp_boxes: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    max_tracked_objects: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub db_path: String,
    pub output_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    /// Indexed by class id.
    pub class_names: Vec<String>,
    pub sources: Vec<String>,
    pub stats_interval_secs: u64,
    pub thresholds: Thresholds,
    pub resize: ImageShape,
    pub jpeg_quality: u8,
    pub write_bbox_copy: bool,
    pub capture_image: CaptureImage,
    pub clamp_boxes: bool,
    /// `None` keeps every tracked id for the lifetime of the stream.
    pub max_tracked_objects: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            log_file: None,
            class_names: DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect(),
            sources: vec![DEFAULT_SOURCE.to_string()],
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
            thresholds: Thresholds::default(),
            resize: ImageShape::new(DEFAULT_RESIZE_WIDTH, DEFAULT_RESIZE_HEIGHT),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            write_bbox_copy: true,
            capture_image: CaptureImage::FullFrame,
            clamp_boxes: false,
            max_tracked_objects: None,
        }
    }
}

impl CaptureConfig {
    /// Reads the file named by `CAPTURE_CONFIG` (if any), then applies
    /// `CAPTURE_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let thresholds = Thresholds {
            ss_confidence: file
                .thresholds
                .as_ref()
                .and_then(|t| t.ss_confidence)
                .unwrap_or(defaults.thresholds.ss_confidence),
            frame_count: file
                .thresholds
                .as_ref()
                .and_then(|t| t.frame_count)
                .unwrap_or(defaults.thresholds.frame_count),
            additional_frame: file
                .thresholds
                .as_ref()
                .and_then(|t| t.additional_frame)
                .unwrap_or(defaults.thresholds.additional_frame),
            max_screenshots: file
                .thresholds
                .as_ref()
                .and_then(|t| t.max_screenshots)
                .unwrap_or(defaults.thresholds.max_screenshots),
        };
        let resize = ImageShape::new(
            file.resize
                .as_ref()
                .and_then(|r| r.width)
                .unwrap_or(defaults.resize.width),
            file.resize
                .as_ref()
                .and_then(|r| r.height)
                .unwrap_or(defaults.resize.height),
        );
        let jpeg_quality = file
            .resize
            .as_ref()
            .and_then(|r| r.jpeg_quality)
            .unwrap_or(defaults.jpeg_quality);
        let write_bbox_copy = file
            .resize
            .as_ref()
            .and_then(|r| r.write_bbox_copy)
            .unwrap_or(defaults.write_bbox_copy);

        let crop_padding = file
            .capture
            .as_ref()
            .and_then(|c| c.crop_padding)
            .unwrap_or(DEFAULT_CROP_PADDING);
        let capture_image = match file.capture.as_ref().and_then(|c| c.image.as_deref()) {
            Some(mode) => parse_capture_image(mode, crop_padding)?,
            None => defaults.capture_image,
        };
        let clamp_boxes = file
            .capture
            .as_ref()
            .and_then(|c| c.clamp_boxes)
            .unwrap_or(defaults.clamp_boxes);

        Ok(Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            log_file: file.log_file,
            class_names: file.classes.unwrap_or(defaults.class_names),
            sources: file.sources.unwrap_or(defaults.sources),
            stats_interval_secs: file
                .stats_interval_secs
                .unwrap_or(defaults.stats_interval_secs),
            thresholds,
            resize,
            jpeg_quality,
            write_bbox_copy,
            capture_image,
            clamp_boxes,
            max_tracked_objects: file.tracker.and_then(|t| t.max_tracked_objects),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("CAPTURE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("CAPTURE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("CAPTURE_LOG_FILE") {
            if !path.trim().is_empty() {
                self.log_file = Some(PathBuf::from(path));
            }
        }
        if let Ok(classes) = std::env::var("CAPTURE_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.class_names = parsed;
            }
        }
        if let Ok(sources) = std::env::var("CAPTURE_SOURCES") {
            let parsed = split_csv(&sources);
            if !parsed.is_empty() {
                self.sources = parsed;
            }
        }
        if let Ok(value) = std::env::var("CAPTURE_SS_CONFIDENCE") {
            self.thresholds.ss_confidence = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAPTURE_SS_CONFIDENCE must be a number"))?;
        }
        if let Ok(value) = std::env::var("CAPTURE_FRAME_COUNT") {
            self.thresholds.frame_count = parse_env_u32("CAPTURE_FRAME_COUNT", &value)?;
        }
        if let Ok(value) = std::env::var("CAPTURE_ADDITIONAL_FRAMES") {
            self.thresholds.additional_frame = parse_env_u32("CAPTURE_ADDITIONAL_FRAMES", &value)?;
        }
        if let Ok(value) = std::env::var("CAPTURE_MAX_SCREENSHOTS") {
            self.thresholds.max_screenshots = parse_env_u32("CAPTURE_MAX_SCREENSHOTS", &value)?;
        }
        if let Ok(value) = std::env::var("CAPTURE_MAX_TRACKED_OBJECTS") {
            let max: usize = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAPTURE_MAX_TRACKED_OBJECTS must be an integer"))?;
            // 0 turns eviction off
            self.max_tracked_objects = Some(max).filter(|max| *max > 0);
        }
        if let Ok(mode) = std::env::var("CAPTURE_IMAGE") {
            let padding = match self.capture_image {
                CaptureImage::Crop { padding } => padding,
                CaptureImage::FullFrame => DEFAULT_CROP_PADDING,
            };
            self.capture_image = parse_capture_image(&mode, padding)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.thresholds.validate()?;
        self.class_names = self
            .class_names
            .iter()
            .map(|name| name.trim().to_string())
            .collect();
        if self.class_names.is_empty() || self.class_names.iter().any(|c| c.is_empty()) {
            return Err(anyhow!("class names must be non-empty"));
        }
        if self.sources.is_empty() {
            return Err(anyhow!("at least one source must be configured"));
        }
        self.resize
            .validate()
            .map_err(|e| anyhow!("resize target: {}", e))?;
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.max_tracked_objects == Some(0) {
            return Err(anyhow!("max_tracked_objects must be greater than zero"));
        }
        if self.stats_interval_secs == 0 {
            return Err(anyhow!("stats_interval_secs must be greater than zero"));
        }
        Ok(())
    }

    /// Settings for one daemon stream: same as [`Self::artifact_settings`]
    /// but rooted at `<output_dir>/<stream_dir_name>`.
    pub fn stream_artifact_settings(&self, index: usize, source: &str) -> ArtifactSettings {
        ArtifactSettings {
            layout: ArtifactLayout::under(&self.output_dir.join(stream_dir_name(index, source))),
            ..self.artifact_settings()
        }
    }

    pub fn artifact_settings(&self) -> ArtifactSettings {
        ArtifactSettings {
            layout: ArtifactLayout::under(&self.output_dir),
            resize: self.resize,
            jpeg_quality: self.jpeg_quality,
            write_bbox_copy: self.write_bbox_copy,
            capture_image: self.capture_image,
            clamp_boxes: self.clamp_boxes,
        }
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_capture_image(mode: &str, padding: u32) -> Result<CaptureImage> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "full" | "frame" => Ok(CaptureImage::FullFrame),
        "crop" => Ok(CaptureImage::Crop { padding }),
        other => Err(anyhow!(
            "capture image mode must be \"full\" or \"crop\", got {:?}",
            other
        )),
    }
}

fn parse_env_u32(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a non-negative integer", key))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
