//! capture_db - inspect the capture database.
//!
//! Prints the `screenshots` schema, the row count and the most recent
//! capture rows, as a table or as JSON lines.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;

use track_capture::ui::Ui;
use track_capture::{CaptureRecord, CaptureStore, SqliteCaptureStore};

#[derive(Parser, Debug)]
#[command(name = "capture_db", about = "Inspect recent capture records")]
struct Args {
    /// Path to the capture SQLite DB
    #[arg(long, env = "CAPTURE_DB_PATH", default_value = "database/database.db")]
    db: String,

    /// Number of most recent rows to print
    #[arg(long, default_value_t = 10)]
    limit: usize,

    /// Print the table columns
    #[arg(long)]
    schema: bool,

    /// Print rows as JSON lines
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let store = {
        let _stage = ui.stage("Open database");
        SqliteCaptureStore::open(&args.db)?
    };

    if args.schema {
        println!("screenshots columns:");
        for column in store.columns()? {
            println!("  {}", column);
        }
        println!();
    }

    let total = store.count()?;
    let records = store.recent(args.limit)?;
    if args.json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    println!("{} capture rows in {}", total, args.db);
    if records.is_empty() {
        return Ok(());
    }
    println!();
    println!(
        "{:>6}  {:<12} {:>5} {:>5} {:>8} {:>11}  {:<8} {:<6}  path",
        "id", "class", "cls", "conf", "object", "timestamp", "resized", "labels"
    );
    for record in &records {
        print_row(record);
    }
    Ok(())
}

fn print_row(record: &CaptureRecord) {
    let resized = record
        .resized_shape
        .map(|shape| shape.to_string())
        .unwrap_or_else(|| "-".to_string());
    let labels = if record.yolo_label_original.is_some() && record.yolo_label_resized.is_some() {
        "yes"
    } else {
        "no"
    };
    println!(
        "{:>6}  {:<12} {:>5} {:>5.2} {:>8} {:>11}  {:<8} {:<6}  {}",
        record.record_id,
        record.class_name,
        record.class_id,
        record.confidence,
        record.object_id.0,
        record.timestamp,
        resized,
        labels,
        record.screenshot_path
    );
}
