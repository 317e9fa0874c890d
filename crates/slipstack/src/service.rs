//! Entry points used by callers outside the pipeline: accepting sheets,
//! re-running uploads, reading summaries and handling duplicate decisions.

use std::path::Path;
use std::sync::Arc;

use log::{error, info};
use serde::Serialize;

use crate::db::models::{ErrorCategory, UploadStatus};
use crate::db::{error_repo, receipt_repo, upload_repo, Database, DatabaseError};
use crate::duplicate::DuplicateDetector;
use crate::error::{Result, SlipstackError};
use crate::storage::FileStorage;
use crate::worker::{JobQueue, UploadRequest};

/// Snapshot of an upload and its receipts, readable without logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub upload_id: i64,
    pub status: UploadStatus,
    pub has_receipts: Option<bool>,
    pub marked_image_url: Option<String>,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub unreadable: u64,
    pub pending: u64,
    pub duplicates: u64,
    pub warnings: u64,
}

impl UploadSummary {
    pub fn message(&self) -> String {
        match (self.status, self.has_receipts) {
            (UploadStatus::Processing, _) => format!(
                "Processing: {} of {} receipt(s) done",
                self.total - self.pending,
                self.total
            ),
            (UploadStatus::Failed, _) => "Processing failed".to_string(),
            (_, Some(false)) => "No receipts detected".to_string(),
            _ => {
                let mut message =
                    format!("{} of {} receipt(s) processed", self.processed, self.total);
                let not_processed = self.failed + self.unreadable;
                if not_processed > 0 {
                    message.push_str(&format!(", {} could not be read", not_processed));
                }
                if self.duplicates > 0 {
                    message.push_str(&format!(", {} possible duplicate(s)", self.duplicates));
                }
                message
            }
        }
    }
}

pub struct UploadService {
    db: Database,
    storage: FileStorage,
    queue: Arc<dyn JobQueue>,
    detector: DuplicateDetector,
}

impl UploadService {
    pub fn new(db: Database, storage: FileStorage, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            detector: DuplicateDetector::new(db.clone()),
            db,
            storage,
            queue,
        }
    }

    /// Stores the sheet, records a `processing` upload and queues it.
    pub fn create_upload(&self, user_id: i64, image_path: &Path) -> Result<UploadRequest> {
        let stored = self.storage.import(image_path)?;
        let upload_id = self
            .db
            .with_conn(|conn| upload_repo::insert(conn, user_id, &stored.public_url))?;

        let request =
            UploadRequest::new(upload_id, self.storage.image_path_for_url(&stored.public_url));
        self.enqueue(request)
    }

    /// Purges an upload's receipts, line items, audit rows and matches,
    /// resets it to `processing` and queues the original image again.
    pub fn reprocess(&self, upload_id: i64) -> Result<UploadRequest> {
        let upload = self.db.with_transaction(|conn| -> Result<_> {
            let upload = upload_repo::find_by_id(conn, upload_id)?
                .ok_or(SlipstackError::UploadNotFound(upload_id))?;
            receipt_repo::clear_for_upload(conn, upload_id, true)?;
            upload_repo::reset_for_reprocess(conn, upload_id)?;
            Ok(upload)
        })?;

        info!("Reprocessing upload {}", upload_id);
        let request = UploadRequest::new(
            upload_id,
            self.storage.image_path_for_url(&upload.original_image_url),
        );
        self.enqueue(request)
    }

    pub fn summary(&self, upload_id: i64) -> Result<UploadSummary> {
        self.db.with_conn(|conn| -> std::result::Result<_, DatabaseError> {
            let Some(upload) = upload_repo::find_by_id(conn, upload_id)? else {
                return Ok(None);
            };
            let counts = receipt_repo::status_counts(conn, upload_id)?;
            let warnings =
                error_repo::count_by_category(conn, upload_id, ErrorCategory::ValidationWarning)?;
            Ok(Some(UploadSummary {
                upload_id,
                status: upload.status,
                has_receipts: upload.has_receipts,
                marked_image_url: upload.marked_image_url,
                total: counts.total(),
                processed: counts.processed,
                failed: counts.failed,
                unreadable: counts.unreadable,
                pending: counts.pending,
                duplicates: counts.duplicates,
                warnings,
            }))
        })?
        .ok_or(SlipstackError::UploadNotFound(upload_id))
    }

    pub fn override_duplicate(&self, receipt_id: i64) -> Result<()> {
        self.detector.override_duplicate_flag(receipt_id)?;
        info!("Duplicate flag overridden for receipt {}", receipt_id);
        Ok(())
    }

    pub fn confirm_duplicate(&self, receipt_id: i64) -> Result<usize> {
        Ok(self.detector.confirm_duplicate(receipt_id)?)
    }

    /// Submits a request. If the queue refuses it the upload is marked
    /// failed so its state never claims work is in progress.
    fn enqueue(&self, request: UploadRequest) -> Result<UploadRequest> {
        match self.queue.submit(request.clone()) {
            Ok(()) => Ok(request),
            Err(e) => {
                error!("Failed to queue upload {}: {}", request.upload_id, e);
                let metadata = serde_json::json!({ "jobId": request.id, "stage": "queue" });
                let recorded = self.db.with_transaction(|conn| -> std::result::Result<(), DatabaseError> {
                    upload_repo::update_status(conn, request.upload_id, UploadStatus::Failed)?;
                    error_repo::insert(
                        conn,
                        request.upload_id,
                        None,
                        ErrorCategory::SystemError,
                        &e.to_string(),
                        &metadata,
                    )?;
                    Ok(())
                });
                if let Err(db_err) = recorded {
                    error!("Failed to record queue failure: {}", db_err);
                }
                Err(e.into())
            }
        }
    }
}
