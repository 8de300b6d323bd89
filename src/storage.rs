use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::geometry::{ImageShape, NormalizedBox, VocBox};
use crate::{open_db_connection, ObjectId};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fields known when the original image has been written.
#[derive(Clone, Debug, PartialEq)]
pub struct NewCapture {
    pub class_name: String,
    pub class_id: u32,
    pub confidence: f32,
    pub object_id: ObjectId,
    pub timestamp: u64,
    pub screenshot_path: String,
    pub original_box: VocBox,
    pub original_shape: ImageShape,
    pub frame_count: u32,
    pub frames_since_last_capture: u32,
}

/// Fields appended once the resized artifact exists.
#[derive(Clone, Debug, PartialEq)]
pub struct ResizedCapture {
    pub screenshot_path: String,
    pub bbox: VocBox,
    pub shape: ImageShape,
}

/// One row of the `screenshots` table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub record_id: i64,
    pub class_name: String,
    pub class_id: u32,
    pub confidence: f32,
    pub object_id: ObjectId,
    pub timestamp: u64,
    pub screenshot_path: String,
    pub original_box: VocBox,
    pub original_shape: ImageShape,
    pub frame_count: u32,
    pub frames_since_last_capture: u32,
    pub resized_screenshot_path: Option<String>,
    pub resized_box: Option<VocBox>,
    pub resized_shape: Option<ImageShape>,
    pub yolo_label_original: Option<NormalizedBox>,
    pub yolo_label_resized: Option<NormalizedBox>,
}

impl CaptureRecord {
    fn from_new(record_id: i64, capture: &NewCapture) -> Self {
        Self {
            record_id,
            class_name: capture.class_name.clone(),
            class_id: capture.class_id,
            confidence: capture.confidence,
            object_id: capture.object_id,
            timestamp: capture.timestamp,
            screenshot_path: capture.screenshot_path.clone(),
            original_box: capture.original_box,
            original_shape: capture.original_shape,
            frame_count: capture.frame_count,
            frames_since_last_capture: capture.frames_since_last_capture,
            resized_screenshot_path: None,
            resized_box: None,
            resized_shape: None,
            yolo_label_original: None,
            yolo_label_resized: None,
        }
    }

    /// True once the resize and label steps have both landed.
    pub fn is_complete(&self) -> bool {
        self.resized_screenshot_path.is_some()
            && self.resized_box.is_some()
            && self.resized_shape.is_some()
            && self.yolo_label_original.is_some()
            && self.yolo_label_resized.is_some()
    }
}

pub trait CaptureStore {
    /// Inserts the original-resolution fields and returns the new record id.
    fn insert_original(&mut self, capture: &NewCapture) -> Result<i64>;

    fn update_resized(&mut self, record_id: i64, resized: &ResizedCapture) -> Result<()>;

    fn update_labels(
        &mut self,
        record_id: i64,
        original: &NormalizedBox,
        resized: &NormalizedBox,
    ) -> Result<()>;

    fn get(&self, record_id: i64) -> Result<Option<CaptureRecord>>;

    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<CaptureRecord>>;

    fn count(&self) -> Result<u64>;
}

pub struct SqliteCaptureStore {
    conn: Connection,
}

impl SqliteCaptureStore {
    /// Opens (and creates if needed) the capture database.
    ///
    /// `file:` URIs are passed through untouched; for plain paths the parent
    /// directory is created first.
    pub fn open(db_path: &str) -> Result<Self> {
        if !db_path.starts_with("file:") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create database directory {}", parent.display())
                    })?;
                }
            }
        }
        let conn = open_db_connection(db_path)
            .with_context(|| format!("failed to open capture database {}", db_path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        // journal_mode returns a row; query it instead of batching it.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS screenshots (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              class_name TEXT NOT NULL,
              class_id INTEGER NOT NULL,
              confidence REAL NOT NULL,
              obj_id INTEGER NOT NULL,
              timestamp INTEGER NOT NULL,
              screenshot_path TEXT NOT NULL,
              x1 REAL NOT NULL,
              y1 REAL NOT NULL,
              x2 REAL NOT NULL,
              y2 REAL NOT NULL,
              orig_shape_height INTEGER NOT NULL,
              orig_shape_width INTEGER NOT NULL,
              frame_count INTEGER NOT NULL,
              frames_since_last_screenshot INTEGER NOT NULL,
              resized_screenshot_path TEXT,
              resized_x1 REAL,
              resized_y1 REAL,
              resized_x2 REAL,
              resized_y2 REAL,
              resized_shape_height INTEGER,
              resized_shape_width INTEGER,
              orig_x_center REAL,
              orig_y_center REAL,
              orig_width REAL,
              orig_height REAL,
              resized_x_center REAL,
              resized_y_center REAL,
              resized_width REAL,
              resized_height REAL
            );

            CREATE INDEX IF NOT EXISTS idx_screenshots_obj ON screenshots(obj_id);
            "#,
        )?;
        Ok(())
    }

    /// Column names in table order, for schema dumps.
    pub fn columns(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(screenshots)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

const SELECT_COLUMNS: &str = r#"
    id, class_name, class_id, confidence, obj_id, timestamp, screenshot_path,
    x1, y1, x2, y2, orig_shape_height, orig_shape_width,
    frame_count, frames_since_last_screenshot,
    resized_screenshot_path, resized_x1, resized_y1, resized_x2, resized_y2,
    resized_shape_height, resized_shape_width,
    orig_x_center, orig_y_center, orig_width, orig_height,
    resized_x_center, resized_y_center, resized_width, resized_height
"#;

fn to_sql_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} {} exceeds i64 range", what, value))
}

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn get_opt_box(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<VocBox>> {
    let x1: Option<f64> = row.get(first)?;
    let y1: Option<f64> = row.get(first + 1)?;
    let x2: Option<f64> = row.get(first + 2)?;
    let y2: Option<f64> = row.get(first + 3)?;
    Ok(match (x1, y1, x2, y2) {
        (Some(x1), Some(y1), Some(x2), Some(y2)) => Some(VocBox::new(x1, y1, x2, y2)),
        _ => None,
    })
}

fn get_opt_normalized(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<NormalizedBox>> {
    let x_center: Option<f64> = row.get(first)?;
    let y_center: Option<f64> = row.get(first + 1)?;
    let width: Option<f64> = row.get(first + 2)?;
    let height: Option<f64> = row.get(first + 3)?;
    Ok(match (x_center, y_center, width, height) {
        (Some(x_center), Some(y_center), Some(width), Some(height)) => Some(NormalizedBox {
            x_center,
            y_center,
            width,
            height,
        }),
        _ => None,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CaptureRecord> {
    let confidence: f64 = row.get(3)?;
    let resized_h: Option<u32> = row.get(20)?;
    let resized_w: Option<u32> = row.get(21)?;
    Ok(CaptureRecord {
        record_id: row.get(0)?,
        class_name: row.get(1)?,
        class_id: row.get(2)?,
        confidence: confidence as f32,
        object_id: ObjectId(get_u64(row, 4)?),
        timestamp: get_u64(row, 5)?,
        screenshot_path: row.get(6)?,
        original_box: VocBox::new(row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?),
        original_shape: ImageShape::new(row.get(12)?, row.get(11)?),
        frame_count: row.get(13)?,
        frames_since_last_capture: row.get(14)?,
        resized_screenshot_path: row.get(15)?,
        resized_box: get_opt_box(row, 16)?,
        resized_shape: match (resized_w, resized_h) {
            (Some(w), Some(h)) => Some(ImageShape::new(w, h)),
            _ => None,
        },
        yolo_label_original: get_opt_normalized(row, 22)?,
        yolo_label_resized: get_opt_normalized(row, 26)?,
    })
}

impl CaptureStore for SqliteCaptureStore {
    fn insert_original(&mut self, capture: &NewCapture) -> Result<i64> {
        let obj_id = to_sql_i64(capture.object_id.0, "object id")?;
        let timestamp = to_sql_i64(capture.timestamp, "timestamp")?;
        let b = &capture.original_box;
        self.conn.execute(
            r#"
            INSERT INTO screenshots(
              class_name, class_id, confidence, obj_id, timestamp, screenshot_path,
              x1, y1, x2, y2, orig_shape_height, orig_shape_width,
              frame_count, frames_since_last_screenshot)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                capture.class_name,
                capture.class_id,
                capture.confidence as f64,
                obj_id,
                timestamp,
                capture.screenshot_path,
                b.x1,
                b.y1,
                b.x2,
                b.y2,
                capture.original_shape.height,
                capture.original_shape.width,
                capture.frame_count,
                capture.frames_since_last_capture
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_resized(&mut self, record_id: i64, resized: &ResizedCapture) -> Result<()> {
        let b = &resized.bbox;
        let changed = self.conn.execute(
            r#"
            UPDATE screenshots
            SET resized_screenshot_path = ?1,
                resized_x1 = ?2, resized_y1 = ?3, resized_x2 = ?4, resized_y2 = ?5,
                resized_shape_height = ?6, resized_shape_width = ?7
            WHERE id = ?8
            "#,
            params![
                resized.screenshot_path,
                b.x1,
                b.y1,
                b.x2,
                b.y2,
                resized.shape.height,
                resized.shape.width,
                record_id
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("capture record {} not found", record_id));
        }
        Ok(())
    }

    fn update_labels(
        &mut self,
        record_id: i64,
        original: &NormalizedBox,
        resized: &NormalizedBox,
    ) -> Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE screenshots
            SET orig_x_center = ?1, orig_y_center = ?2, orig_width = ?3, orig_height = ?4,
                resized_x_center = ?5, resized_y_center = ?6, resized_width = ?7,
                resized_height = ?8
            WHERE id = ?9
            "#,
            params![
                original.x_center,
                original.y_center,
                original.width,
                original.height,
                resized.x_center,
                resized.y_center,
                resized.width,
                resized.height,
                record_id
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("capture record {} not found", record_id));
        }
        Ok(())
    }

    fn get(&self, record_id: i64) -> Result<Option<CaptureRecord>> {
        let sql = format!("SELECT {} FROM screenshots WHERE id = ?1", SELECT_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, params![record_id], record_from_row)
            .optional()?;
        Ok(record)
    }

    fn recent(&self, limit: usize) -> Result<Vec<CaptureRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {} FROM screenshots ORDER BY id DESC LIMIT ?1",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![limit], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM screenshots", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryCaptureStore {
    records: Vec<CaptureRecord>,
}

impl InMemoryCaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[CaptureRecord] {
        &self.records
    }

    fn find_mut(&mut self, record_id: i64) -> Result<&mut CaptureRecord> {
        self.records
            .iter_mut()
            .find(|record| record.record_id == record_id)
            .ok_or_else(|| anyhow!("capture record {} not found", record_id))
    }
}

impl CaptureStore for InMemoryCaptureStore {
    fn insert_original(&mut self, capture: &NewCapture) -> Result<i64> {
        let record_id = self.records.len() as i64 + 1;
        self.records
            .push(CaptureRecord::from_new(record_id, capture));
        Ok(record_id)
    }

    fn update_resized(&mut self, record_id: i64, resized: &ResizedCapture) -> Result<()> {
        let record = self.find_mut(record_id)?;
        record.resized_screenshot_path = Some(resized.screenshot_path.clone());
        record.resized_box = Some(resized.bbox);
        record.resized_shape = Some(resized.shape);
        Ok(())
    }

    fn update_labels(
        &mut self,
        record_id: i64,
        original: &NormalizedBox,
        resized: &NormalizedBox,
    ) -> Result<()> {
        let record = self.find_mut(record_id)?;
        record.yolo_label_original = Some(*original);
        record.yolo_label_resized = Some(*resized);
        Ok(())
    }

    fn get(&self, record_id: i64) -> Result<Option<CaptureRecord>> {
        Ok(self
            .records
            .iter()
            .find(|record| record.record_id == record_id)
            .cloned())
    }

    fn recent(&self, limit: usize) -> Result<Vec<CaptureRecord>> {
        Ok(self.records.iter().rev().take(limit).cloned().collect())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory_uri;

    fn sample_capture(object_id: u64) -> NewCapture {
        NewCapture {
            class_name: "car".to_string(),
            class_id: 2,
            confidence: 0.87,
            object_id: ObjectId(object_id),
            timestamp: 1_721_517_879,
            screenshot_path: format!(
                "screenshots/original/screenshots/car_2_0.87_{}_1721517879.png",
                object_id
            ),
            original_box: VocBox::new(100.0, 50.0, 300.0, 250.0),
            original_shape: ImageShape::new(1920, 1080),
            frame_count: 3,
            frames_since_last_capture: 2,
        }
    }

    fn exercise_store(store: &mut dyn CaptureStore) -> Result<()> {
        let id = store.insert_original(&sample_capture(7))?;
        let record = store.get(id)?.expect("inserted record");
        assert_eq!(record.class_name, "car");
        assert_eq!(record.object_id, ObjectId(7));
        assert_eq!(record.original_shape, ImageShape::new(1920, 1080));
        assert!((record.confidence - 0.87).abs() < 1e-6);
        assert!(!record.is_complete());

        let resized = ResizedCapture {
            screenshot_path: "resized.jpg".to_string(),
            bbox: VocBox::new(66.67, 33.33, 200.0, 166.67),
            shape: ImageShape::new(1280, 720),
        };
        store.update_resized(id, &resized)?;
        let label = NormalizedBox {
            x_center: 0.1,
            y_center: 0.2,
            width: 0.3,
            height: 0.4,
        };
        store.update_labels(id, &label, &label)?;

        let record = store.get(id)?.expect("updated record");
        assert_eq!(record.resized_shape, Some(ImageShape::new(1280, 720)));
        assert_eq!(record.resized_box, Some(resized.bbox));
        assert_eq!(record.yolo_label_resized, Some(label));
        assert!(record.is_complete());

        let second = store.insert_original(&sample_capture(8))?;
        assert_ne!(id, second);
        assert_eq!(store.count()?, 2);
        let recent = store.recent(1)?;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].record_id, second);

        assert!(store.get(9_999)?.is_none());
        assert!(store.update_resized(9_999, &resized).is_err());
        assert!(store.update_labels(9_999, &label, &label).is_err());
        Ok(())
    }

    #[test]
    fn sqlite_store_round_trips_records() -> Result<()> {
        let mut store = SqliteCaptureStore::open(&shared_memory_uri())?;
        exercise_store(&mut store)
    }

    #[test]
    fn in_memory_store_round_trips_records() -> Result<()> {
        let mut store = InMemoryCaptureStore::new();
        exercise_store(&mut store)
    }

    #[test]
    fn sqlite_schema_has_capture_columns() -> Result<()> {
        let store = SqliteCaptureStore::open(&shared_memory_uri())?;
        let columns = store.columns()?;
        assert_eq!(columns.len(), 30);
        for name in [
            "obj_id",
            "frames_since_last_screenshot",
            "resized_shape_width",
            "orig_x_center",
            "resized_height",
        ] {
            assert!(columns.iter().any(|c| c == name), "missing column {}", name);
        }
        Ok(())
    }

    #[test]
    fn sqlite_store_creates_parent_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("database").join("database.db");
        let path_str = path.to_string_lossy().to_string();
        {
            let mut store = SqliteCaptureStore::open(&path_str)?;
            store.insert_original(&sample_capture(1))?;
        }
        let store = SqliteCaptureStore::open(&path_str)?;
        assert_eq!(store.count()?, 1);
        Ok(())
    }
}
