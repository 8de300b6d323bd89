//! label_check - draw label files back onto their images.
//!
//! For every image with a matching `.txt` label file, writes a PNG with the
//! label boxes and centers drawn on it, so a capture run can be checked by
//! eye.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

use track_capture::annotate::annotate_directory;
use track_capture::ui::Ui;
use track_capture::ArtifactLayout;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Resolution {
    Original,
    Resized,
}

#[derive(Parser, Debug)]
#[command(name = "label_check", about = "Overlay YOLO labels on captured images")]
struct Args {
    /// Artifact root written by captured
    #[arg(long, env = "CAPTURE_OUTPUT_DIR", default_value = "screenshots")]
    root: PathBuf,

    /// Which artifact pair to check
    #[arg(long, value_enum, default_value = "resized")]
    resolution: Resolution,

    /// Image directory (overrides --root/--resolution)
    #[arg(long, requires = "labels")]
    images: Option<PathBuf>,

    /// Label directory (overrides --root/--resolution)
    #[arg(long, requires = "images")]
    labels: Option<PathBuf>,

    /// Output directory (default: <root>/<resolution>/annotated)
    #[arg(long)]
    out: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let layout = ArtifactLayout::under(&args.root);
    let (images, labels, default_out) = match args.resolution {
        Resolution::Original => (
            layout.original_images,
            layout.original_labels,
            args.root.join("original").join("annotated"),
        ),
        Resolution::Resized => (
            layout.resized_images,
            layout.resized_labels,
            args.root.join("resized").join("annotated"),
        ),
    };
    let images = args.images.unwrap_or(images);
    let labels = args.labels.unwrap_or(labels);
    let out = args.out.unwrap_or(default_out);

    let report = {
        let _stage = ui.stage("Annotate images");
        annotate_directory(&images, &labels, &out)?
    };

    println!(
        "annotated {} image(s) from {} into {}",
        report.annotated,
        images.display(),
        out.display()
    );
    for path in &report.missing_labels {
        println!("  no label: {}", path.display());
    }
    for path in &report.failed {
        println!("  failed:   {}", path.display());
    }
    if !report.failed.is_empty() {
        return Err(anyhow!("{} image(s) could not be annotated", report.failed.len()));
    }
    Ok(())
}
