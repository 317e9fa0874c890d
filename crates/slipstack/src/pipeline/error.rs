use std::path::PathBuf;

use thiserror::Error;

/// Whole-job failures. Per-receipt problems never surface here; they are
/// recorded against the receipt and the run continues.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Upload {0} not found")]
    UploadNotFound(i64),

    #[error("Failed to read source image '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source image unusable: {0}")]
    Image(#[from] crate::error::ProcessError),

    #[error("Segmentation failed: {0}")]
    Segment(#[from] crate::processor::SegmentError),

    #[error("Extractor unavailable: {0}")]
    ExtractorUnavailable(String),

    #[error("Database failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Duplicate check failed: {0}")]
    Duplicate(#[from] crate::duplicate::DuplicateError),

    #[error("Storage failed: {0}")]
    Storage(#[from] crate::error::StorageError),
}

impl PipelineError {
    /// Whether running the job again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::UploadNotFound(_))
    }
}

#[derive(Debug, Clone)]
pub enum PipelineWarning {
    /// Drawing region outlines failed; the unmodified sheet was stored instead.
    OverlayFailed { error: String },
}
