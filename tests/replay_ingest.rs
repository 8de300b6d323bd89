use anyhow::Result;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::io::Write;

use track_capture::{
    open_source, CaptureConfig, CaptureStore, DetectionSource, InMemoryCaptureStore, Pipeline,
    Thresholds,
};

fn config(root: &std::path::Path) -> CaptureConfig {
    CaptureConfig {
        output_dir: root.join("screenshots"),
        class_names: vec!["bird".to_string(), "squirrel".to_string()],
        resize: track_capture::ImageShape::new(80, 60),
        thresholds: Thresholds {
            frame_count: 3,
            ss_confidence: 0.5,
            additional_frame: 4,
            max_screenshots: 2,
        },
        ..CaptureConfig::default()
    }
}

#[test]
fn replayed_detections_drive_captures() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let frames_dir = dir.path().join("frames");
    std::fs::create_dir_all(&frames_dir)?;

    let jsonl_path = dir.path().join("run.jsonl");
    let mut jsonl = std::fs::File::create(&jsonl_path)?;
    for i in 0..12u32 {
        let frame = RgbImage::from_pixel(160, 120, Rgb([(i * 20) as u8, 40, 90]));
        frame.save_with_format(frames_dir.join(format!("{:04}.png", i)), ImageFormat::Png)?;
        let x = 10 + i * 5;
        // Object 1 is steady; object 2 flickers below threshold every other frame.
        let flicker = if i % 2 == 0 { 0.8 } else { 0.3 };
        let record = json!({
            "frame": format!("frames/{:04}.png", i),
            "timestamp": 1_721_517_800 + i,
            "detections": [
                {"object_id": 1, "class_id": 1, "confidence": 0.9, "box": [x, 20, x + 30, 60]},
                {"object_id": 2, "class_id": 0, "confidence": flicker, "box": [5, 70, 40, 110]},
                {"object_id": null, "class_id": 0, "confidence": 0.99, "box": [0, 0, 10, 10]},
            ],
        });
        writeln!(jsonl, "{}", record)?;
    }
    writeln!(jsonl, "{{broken")?;
    drop(jsonl);

    let cfg = config(dir.path());
    let mut pipeline = Pipeline::new(&cfg, InMemoryCaptureStore::new())?;
    let mut source = open_source(jsonl_path.to_str().unwrap())?;
    while let Some(batch) = source.next_batch()? {
        pipeline.process_batch(&batch);
    }

    let stats = source.stats();
    assert_eq!(stats.batches, 12);
    assert_eq!(stats.skipped, 1);

    let pipeline_stats = pipeline.stats().clone();
    assert_eq!(pipeline_stats.batches, 12);
    assert_eq!(pipeline_stats.events, 36);
    // Every untracked detection is counted as an error and skipped.
    assert_eq!(pipeline_stats.errors, 12);
    // Object 1: initial at index 2, additional at index 4, stop at index 5.
    assert_eq!(pipeline_stats.captures, 2);
    assert_eq!(pipeline_stats.stops, 1);

    let records = pipeline.store().recent(10)?;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.class_name == "squirrel" && r.is_complete()));
    assert_eq!(records[1].timestamp, 1_721_517_802);
    assert_eq!(records[0].timestamp, 1_721_517_804);
    Ok(())
}

#[test]
fn synthetic_source_runs_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let mut pipeline = Pipeline::new(&cfg, InMemoryCaptureStore::new())?;
    let mut source = open_source("stub://yard?frames=30&objects=2")?;
    while let Some(batch) = source.next_batch()? {
        pipeline.process_batch(&batch);
    }
    assert_eq!(pipeline.stats().batches, 30);
    assert_eq!(pipeline.stats().errors, 0);
    assert!(pipeline.store().count()? >= 2);
    assert!(pipeline.store().count()? <= 4);
    Ok(())
}
