use serde::{Deserialize, Serialize};

use crate::db::models::UploadStatus;

/// A queued request to process one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Unique per submission; an upload reprocessed twice gets two ids.
    pub id: String,
    pub upload_id: i64,
    /// Absolute path, `uploads/…` path or bare file name in the uploads directory.
    pub image_path: String,
}

impl UploadRequest {
    pub fn new(upload_id: i64, image_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            upload_id,
            image_path: image_path.into(),
        }
    }
}

/// Outcome of a job after all attempts.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub upload_id: i64,
    pub success: bool,
    /// Final upload status when the run finished normally.
    pub status: Option<UploadStatus>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(request: &UploadRequest, status: UploadStatus, attempts: u32) -> Self {
        Self {
            job_id: request.id.clone(),
            upload_id: request.upload_id,
            success: true,
            status: Some(status),
            attempts,
            error: None,
        }
    }

    pub fn failure(request: &UploadRequest, error: String, attempts: u32) -> Self {
        Self {
            job_id: request.id.clone(),
            upload_id: request.upload_id,
            success: false,
            status: None,
            attempts,
            error: Some(error),
        }
    }
}
