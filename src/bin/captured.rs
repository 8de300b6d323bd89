//! captured - tracked-object capture daemon
//!
//! This daemon:
//! 1. Loads configuration (`CAPTURE_CONFIG` file + `CAPTURE_*` overrides)
//! 2. Creates the artifact directories and the capture database
//! 3. Runs one independent pipeline thread per configured source, each
//!    writing artifacts under its own `<output_dir>/<NN>-<source>` root
//! 4. Stops after the in-flight batch on Ctrl-C, or when every source ends

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use track_capture::artifacts::ArtifactSettings;
use track_capture::ui::{Progress, Ui};
use track_capture::{
    logging, open_source, CaptureConfig, DetectionSource, Pipeline, PipelineStats,
    SqliteCaptureStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "captured",
    about = "Capture training images and labels for consistently tracked objects"
)]
struct Args {
    /// Config file (TOML or JSON)
    #[arg(long, env = "CAPTURE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Detection source (replay JSONL path or stub://name); repeatable,
    /// replaces the configured sources
    #[arg(long = "source", value_name = "SOURCE")]
    sources: Vec<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = CaptureConfig::load_from(args.config.as_deref())?;
    if !args.sources.is_empty() {
        cfg.sources = args.sources.clone();
    }
    logging::init(cfg.log_file.as_deref())?;

    let is_tty = std::io::stderr().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, false);

    let stream_artifacts = {
        let _stage = ui.stage("Prepare output directories");
        let settings: Vec<ArtifactSettings> = cfg
            .sources
            .iter()
            .enumerate()
            .map(|(index, uri)| cfg.stream_artifact_settings(index, uri))
            .collect();
        for stream in &settings {
            stream.layout.ensure_dirs()?;
        }
        settings
    };
    {
        let _stage = ui.stage("Open database");
        SqliteCaptureStore::open(&cfg.db_path)?;
    }
    let sources = {
        let _stage = ui.stage("Open sources");
        cfg.sources
            .iter()
            .map(|uri| open_source(uri))
            .collect::<Result<Vec<_>>>()?
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    log::info!("captured running. writing to {}", cfg.db_path);
    log::info!(
        "thresholds: ss_confidence={} frame_count={} additional_frame={} max_screenshots={}",
        cfg.thresholds.ss_confidence,
        cfg.thresholds.frame_count,
        cfg.thresholds.additional_frame,
        cfg.thresholds.max_screenshots
    );
    log::info!(
        "artifacts under {} (resize {}, capture {:?})",
        cfg.output_dir.display(),
        cfg.resize,
        cfg.capture_image
    );

    let cfg = Arc::new(cfg);
    let mut handles = Vec::with_capacity(sources.len());
    for (index, (source, artifacts)) in sources.into_iter().zip(stream_artifacts).enumerate() {
        let cfg = Arc::clone(&cfg);
        let stop = Arc::clone(&stop);
        let progress = ui.progress(source.name(), None);
        let handle = thread::Builder::new()
            .name(format!("capture-{}", index))
            .spawn(move || run_stream(&cfg, artifacts, source, &stop, &progress))?;
        handles.push(handle);
    }

    let mut total = PipelineStats::default();
    let mut failed = 0usize;
    for handle in handles {
        match handle.join() {
            Ok(Ok(stats)) => accumulate(&mut total, &stats),
            Ok(Err(e)) => {
                failed += 1;
                log::error!("stream failed: {:#}", e);
            }
            Err(_) => {
                failed += 1;
                log::error!("stream thread panicked");
            }
        }
    }

    log::info!(
        "captured stopped: {} batches, {} events, {} captures ({} partial), {} stops, {} errors",
        total.batches,
        total.events,
        total.captures,
        total.partial_captures,
        total.stops,
        total.errors
    );
    if failed > 0 {
        return Err(anyhow!("{} stream(s) failed", failed));
    }
    Ok(())
}

fn run_stream(
    cfg: &CaptureConfig,
    artifacts: ArtifactSettings,
    mut source: Box<dyn DetectionSource>,
    stop: &AtomicBool,
    progress: &Progress,
) -> Result<PipelineStats> {
    let name = source.name().to_string();
    // Each stream gets its own connection.
    let store = SqliteCaptureStore::open(&cfg.db_path)?;
    let artifact_root = artifacts.layout.root.clone();
    let mut pipeline = Pipeline::with_artifacts(cfg, artifacts, store)?;
    let stats_interval = Duration::from_secs(cfg.stats_interval_secs);
    let mut last_stats_log = Instant::now();
    let mut batches_since_log = 0u64;

    log::info!(
        "{}: stream started, artifacts under {}",
        name,
        artifact_root.display()
    );
    while !stop.load(Ordering::SeqCst) {
        let batch = match source.next_batch() {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                log::info!("{}: stream ended", name);
                break;
            }
            Err(e) => {
                log::error!("{}: source failed: {:#}", name, e);
                break;
            }
        };
        pipeline.process_batch(&batch);
        batches_since_log += 1;
        progress.inc(1);
        progress.set_message(format!("{} captures", pipeline.stats().captures));

        if last_stats_log.elapsed() >= stats_interval {
            let fps = batches_since_log as f64 / last_stats_log.elapsed().as_secs_f64();
            let stats = pipeline.stats();
            log::info!(
                "{}: {:.1} fps, {} tracked, {} captures, {} errors",
                name,
                fps,
                pipeline.tracker().len(),
                stats.captures,
                stats.errors
            );
            last_stats_log = Instant::now();
            batches_since_log = 0;
        }
    }

    let source_stats = source.stats();
    if source_stats.skipped > 0 {
        log::warn!("{}: skipped {} undecodable records", name, source_stats.skipped);
    }
    let stats = pipeline.stats().clone();
    progress.finish(&format!(
        "{} batches, {} captures",
        stats.batches, stats.captures
    ));
    Ok(stats)
}

fn accumulate(total: &mut PipelineStats, stats: &PipelineStats) {
    total.batches += stats.batches;
    total.events += stats.events;
    total.captures += stats.captures;
    total.partial_captures += stats.partial_captures;
    total.stops += stats.stops;
    total.errors += stats.errors;
}
