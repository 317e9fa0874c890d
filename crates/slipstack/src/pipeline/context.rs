use serde::Serialize;

use crate::db::models::{ReceiptStatus, UploadRow, UploadStatus};
use crate::processor::Region;
use crate::worker::job::UploadRequest;

use super::error::PipelineWarning;

/// Pipeline step, recorded for failure metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Segment,
    Annotate,
    Receipts,
    Finalize,
}

/// What happened to one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptOutcome {
    pub receipt_id: i64,
    pub region_index: usize,
    pub status: ReceiptStatus,
    pub duplicate_of: Option<i64>,
    pub confidence_score: Option<f64>,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub upload_id: i64,
    pub status: UploadStatus,
    pub has_receipts: bool,
    pub marked_image_url: Option<String>,
    pub receipts: Vec<ReceiptOutcome>,
}

impl UploadOutcome {
    pub fn count(&self, status: ReceiptStatus) -> usize {
        self.receipts.iter().filter(|r| r.status == status).count()
    }
}

pub struct PipelineContext {
    // Input
    pub request: UploadRequest,
    pub stage: Stage,

    // Load result
    pub upload: Option<UploadRow>,

    // Segment results
    pub regions: Vec<Region>,

    // Annotate result
    pub marked_image_url: Option<String>,

    // Per-region results, in region order
    pub receipts: Vec<ReceiptOutcome>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(request: UploadRequest) -> Self {
        Self {
            request,
            stage: Stage::Load,
            upload: None,
            regions: Vec::new(),
            marked_image_url: None,
            receipts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn upload_id(&self) -> i64 {
        self.request.upload_id
    }
}
