use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures isolated to a single detection event.
///
/// None of these stop the pipeline; the consumer logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Zero-sized image shape handed to the coordinate transformer.
    #[error("invalid image shape {width}x{height}")]
    InvalidShape { width: u32, height: u32 },

    /// Detection arrived without a tracker id.
    #[error("detection has no track id")]
    MissingTrackId,

    /// Confidence or box violates the detection contract.
    #[error("invalid detection: {0}")]
    InvalidDetection(String),

    /// Class id outside the configured class-name table.
    #[error("class id {0} has no configured class name")]
    UnknownClass(u32),

    /// Filesystem failure while writing an image or label.
    #[error("failed to write artifact {}: {source}", .path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Database failure while inserting or updating a capture row.
    #[error("persistence failure during {stage}: {source}")]
    Persistence {
        stage: &'static str,
        #[source]
        source: BoxError,
    },
}

impl CaptureError {
    pub fn artifact_write(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        Self::ArtifactWrite {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn persistence(stage: &'static str, source: anyhow::Error) -> Self {
        Self::Persistence {
            stage,
            source: source.into(),
        }
    }

    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::InvalidShape { .. } => "InvalidShapeError",
            CaptureError::MissingTrackId => "MissingTrackIdError",
            CaptureError::InvalidDetection(_) => "InvalidDetectionError",
            CaptureError::UnknownClass(_) => "UnknownClassError",
            CaptureError::ArtifactWrite { .. } => "ArtifactWriteError",
            CaptureError::Persistence { .. } => "PersistenceError",
        }
    }
}

/// A capture that did not complete.
///
/// `record_id` is set once the row was inserted; from then on the capture
/// counts against the object even though later steps failed.
#[derive(Debug)]
pub struct CaptureFailure {
    pub error: CaptureError,
    pub record_id: Option<i64>,
}

impl CaptureFailure {
    pub fn before_insert(error: CaptureError) -> Self {
        Self {
            error,
            record_id: None,
        }
    }

    pub fn after_insert(record_id: i64, error: CaptureError) -> Self {
        Self {
            error,
            record_id: Some(record_id),
        }
    }
}

impl std::fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.record_id {
            Some(id) => write!(f, "{} (record {} left partial)", self.error, id),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for CaptureFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_mentions_partial_record() {
        let failure = CaptureFailure::after_insert(
            12,
            CaptureError::persistence("update_labels", anyhow::anyhow!("disk I/O error")),
        );
        let text = failure.to_string();
        assert!(text.contains("update_labels"));
        assert!(text.contains("record 12"));
        assert_eq!(failure.error.code(), "PersistenceError");
    }

    #[test]
    fn artifact_write_wraps_io_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = CaptureError::artifact_write("/tmp/x.png", io);
        assert_eq!(err.code(), "ArtifactWriteError");
        assert!(err.to_string().contains("/tmp/x.png"));
    }
}
