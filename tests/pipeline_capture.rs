use anyhow::Result;
use std::path::Path;

use track_capture::{
    CaptureAction, CaptureConfig, CaptureStore, DetectionEvent, EventOutcome, Frame, ImageShape,
    ObjectId, Pipeline, SqliteCaptureStore, Thresholds, VocBox, YoloLabel,
};

const WIDTH: u32 = 192;
const HEIGHT: u32 = 108;

fn config(root: &Path) -> CaptureConfig {
    CaptureConfig {
        db_path: root.join("database").join("database.db").display().to_string(),
        output_dir: root.join("screenshots"),
        class_names: vec!["bird".to_string(), "squirrel".to_string()],
        resize: ImageShape::new(128, 72),
        thresholds: Thresholds {
            frame_count: 3,
            ss_confidence: 0.5,
            additional_frame: 20,
            max_screenshots: 2,
        },
        ..CaptureConfig::default()
    }
}

fn frame(timestamp: u64) -> Frame {
    let data = (0..WIDTH * HEIGHT * 3).map(|i| (i % 253) as u8).collect();
    Frame::from_rgb(data, WIDTH, HEIGHT, timestamp).unwrap()
}

fn detection(object_id: u64, confidence: f32, timestamp: u64) -> DetectionEvent {
    DetectionEvent {
        object_id: Some(ObjectId(object_id)),
        class_id: 0,
        confidence,
        bbox: VocBox::new(10.0, 5.0, 30.0, 25.0),
        frame_width: WIDTH,
        frame_height: HEIGHT,
        timestamp,
    }
}

fn open_pipeline(cfg: &CaptureConfig) -> Result<Pipeline<SqliteCaptureStore>> {
    Pipeline::new(cfg, SqliteCaptureStore::open(&cfg.db_path)?)
}

#[test]
fn initial_capture_writes_every_artifact_and_one_complete_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let mut pipeline = open_pipeline(&cfg)?;

    let mut outcomes = Vec::new();
    for ts in 1..=3 {
        let event = detection(7, 0.6, 1_700_000_000 + ts);
        outcomes.push(pipeline.process_event(&event, &frame(ts))?);
    }
    assert_eq!(outcomes[0], EventOutcome::Ignored);
    assert_eq!(outcomes[1], EventOutcome::Ignored);
    let record = match &outcomes[2] {
        EventOutcome::Captured { action, record } => {
            assert_eq!(*action, CaptureAction::InitialCapture);
            record.clone()
        }
        other => panic!("expected initial capture, got {:?}", other),
    };

    let layout = cfg.artifact_settings().layout;
    let stem = "bird_0_0.60_7_1700000003";
    let png = layout.original_images.join(format!("{}.png", stem));
    let jpg = layout.resized_images.join(format!("{}.jpg", stem));
    let bbox_jpg = layout.resized_bbox_images.join(format!("{}_bbox.jpg", stem));
    let original_txt = layout.original_labels.join(format!("{}.txt", stem));
    let resized_txt = layout.resized_labels.join(format!("{}.txt", stem));
    for path in [&png, &jpg, &bbox_jpg, &original_txt, &resized_txt] {
        assert!(path.is_file(), "missing {}", path.display());
    }

    let original_label = YoloLabel::parse_line(&std::fs::read_to_string(&original_txt)?)?;
    let resized_label = YoloLabel::parse_line(&std::fs::read_to_string(&resized_txt)?)?;
    // Same normalized box in both resolutions.
    assert!((original_label.bbox.x_center - resized_label.bbox.x_center).abs() < 1e-9);
    assert!((original_label.bbox.height - resized_label.bbox.height).abs() < 1e-9);
    assert!((original_label.bbox.x_center - 20.0 / 192.0).abs() < 1e-12);

    // Fresh connection sees the committed row.
    let store = SqliteCaptureStore::open(&cfg.db_path)?;
    assert_eq!(store.count()?, 1);
    let row = store.get(record.record_id)?.expect("row");
    assert!(row.is_complete());
    assert_eq!(row.original_shape, ImageShape::new(WIDTH, HEIGHT));
    assert_eq!(row.resized_shape, Some(ImageShape::new(128, 72)));
    assert_eq!(row.frame_count, 3);
    assert_eq!(row.frames_since_last_capture, 2);
    assert_eq!(row.screenshot_path, png.display().to_string());
    let resized_box = row.resized_box.expect("resized box");
    assert!((resized_box.x1 - 10.0 * 128.0 / 192.0).abs() < 1e-9);
    assert!((resized_box.y2 - 25.0 * 72.0 / 108.0).abs() < 1e-9);
    assert_eq!(row.yolo_label_original, Some(original_label.bbox));
    Ok(())
}

#[test]
fn failed_image_write_does_not_consume_the_initial_capture() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let mut pipeline = open_pipeline(&cfg)?;
    let originals = cfg.artifact_settings().layout.original_images;

    pipeline.process_event(&detection(3, 0.9, 1), &frame(1))?;
    pipeline.process_event(&detection(3, 0.9, 2), &frame(2))?;

    // Make the original image directory unwritable by replacing it with a file.
    std::fs::remove_dir_all(&originals)?;
    std::fs::write(&originals, b"blocked")?;
    let err = pipeline
        .process_event(&detection(3, 0.9, 3), &frame(3))
        .unwrap_err();
    assert_eq!(err.code(), "ArtifactWriteError");
    let snap = pipeline.tracker().snapshot(ObjectId(3)).expect("tracked");
    assert!(!snap.initial_captured);
    assert_eq!(pipeline.store().count()?, 0);

    std::fs::remove_file(&originals)?;
    let outcome = pipeline.process_event(&detection(3, 0.9, 4), &frame(4))?;
    assert!(matches!(
        outcome,
        EventOutcome::Captured {
            action: CaptureAction::InitialCapture,
            ..
        }
    ));
    assert_eq!(pipeline.store().count()?, 1);
    Ok(())
}

#[test]
fn failure_after_insert_never_duplicates_the_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let mut pipeline = open_pipeline(&cfg)?;
    let resized = cfg.artifact_settings().layout.resized_images;

    std::fs::remove_dir_all(&resized)?;
    std::fs::write(&resized, b"blocked")?;
    for ts in 1..=2 {
        pipeline.process_event(&detection(4, 0.9, ts), &frame(ts))?;
    }
    let err = pipeline
        .process_event(&detection(4, 0.9, 3), &frame(3))
        .unwrap_err();
    assert_eq!(err.code(), "ArtifactWriteError");

    // The row was inserted, so the capture counts.
    let snap = pipeline.tracker().snapshot(ObjectId(4)).expect("tracked");
    assert!(snap.initial_captured);
    assert_eq!(snap.capture_count, 1);
    assert_eq!(pipeline.stats().partial_captures, 1);

    let outcome = pipeline.process_event(&detection(4, 0.9, 4), &frame(4))?;
    assert_eq!(outcome, EventOutcome::Ignored);
    let rows = pipeline.store().recent(10)?;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].resized_screenshot_path.is_none());
    Ok(())
}

#[test]
fn dip_and_recovery_through_the_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let mut pipeline = open_pipeline(&cfg)?;

    let outcomes = [0.6, 0.3, 0.6, 0.6, 0.6]
        .iter()
        .enumerate()
        .map(|(i, c)| pipeline.process_event(&detection(9, *c, i as u64), &frame(i as u64)))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(outcomes[..4].iter().all(|o| *o == EventOutcome::Ignored));
    assert!(matches!(outcomes[4], EventOutcome::Captured { .. }));
    // The dip cleared the counter but not the history.
    assert_eq!(
        pipeline.tracker().confidence_history(ObjectId(9)).unwrap().len(),
        4
    );
    Ok(())
}

#[test]
fn objects_are_tracked_independently() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let mut pipeline = open_pipeline(&cfg)?;

    for ts in 0..3u64 {
        pipeline.process_event(&detection(1, 0.9, ts), &frame(ts))?;
        pipeline.process_event(&detection(2, if ts == 1 { 0.2 } else { 0.9 }, ts), &frame(ts))?;
    }
    assert_eq!(pipeline.store().count()?, 1);
    assert!(pipeline.tracker().snapshot(ObjectId(1)).unwrap().initial_captured);
    assert!(!pipeline.tracker().snapshot(ObjectId(2)).unwrap().initial_captured);
    Ok(())
}

#[test]
fn eviction_drops_the_oldest_id() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    cfg.max_tracked_objects = Some(2);
    let mut pipeline = open_pipeline(&cfg)?;

    pipeline.process_event(&detection(1, 0.9, 0), &frame(0))?;
    pipeline.process_event(&detection(2, 0.9, 1), &frame(1))?;
    pipeline.process_event(&detection(3, 0.9, 2), &frame(2))?;

    assert_eq!(pipeline.tracker().len(), 2);
    assert!(pipeline.tracker().snapshot(ObjectId(1)).is_none());
    assert_eq!(pipeline.tracker().evicted(), 1);
    Ok(())
}

#[test]
fn streams_sharing_a_config_never_share_artifacts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let sources = ["stub://front", "stub://back"];
    let mut pipelines = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        pipelines.push(Pipeline::with_artifacts(
            &cfg,
            cfg.stream_artifact_settings(index, source),
            SqliteCaptureStore::open(&cfg.db_path)?,
        )?);
    }

    // Same object id, class, confidence and second on both streams; only
    // the pixels differ.
    let shades = [200u8, 10u8];
    let mut records = Vec::new();
    for (pipeline, shade) in pipelines.iter_mut().zip(shades) {
        let data = vec![shade; (WIDTH * HEIGHT * 3) as usize];
        let frame = Frame::from_rgb(data, WIDTH, HEIGHT, 1)?;
        let event = detection(1, 0.9, 1_700_000_000);
        let mut captured = None;
        for _ in 0..3 {
            let outcome = pipeline.process_event(&event, &frame)?;
            if let EventOutcome::Captured { record, .. } = outcome {
                captured = Some(record);
            }
        }
        records.push(captured.expect("third frame captures"));
    }

    assert_ne!(records[0].screenshot_path, records[1].screenshot_path);
    assert_ne!(
        records[0].resized_screenshot_path,
        records[1].resized_screenshot_path
    );
    for (record, shade) in records.iter().zip(shades) {
        let png = image::open(&record.screenshot_path)?.to_rgb8();
        assert_eq!(png.get_pixel(0, 0).0, [shade; 3]);
    }
    assert!(dir.path().join("screenshots/00-front/original/screenshots").is_dir());
    assert!(dir.path().join("screenshots/01-back/original/screenshots").is_dir());
    assert_eq!(pipelines[0].store().count()?, 2);
    Ok(())
}
