//! Upload progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::models::UploadStatus;

/// Phase of upload processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Queued,
    Loading,
    Segmenting,
    Annotating,
    ProcessingReceipts,
    Finalizing,
    Retrying,
    Completed,
    Failed,
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadPhase::Queued => write!(f, "Queued"),
            UploadPhase::Loading => write!(f, "Loading"),
            UploadPhase::Segmenting => write!(f, "Detecting receipts"),
            UploadPhase::Annotating => write!(f, "Marking regions"),
            UploadPhase::ProcessingReceipts => write!(f, "Processing receipts"),
            UploadPhase::Finalizing => write!(f, "Finalizing"),
            UploadPhase::Retrying => write!(f, "Retrying"),
            UploadPhase::Completed => write!(f, "Completed"),
            UploadPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for one upload job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressEvent {
    pub upload_id: i64,
    /// Identifier of the queued request (one per submission).
    pub job_id: String,
    pub phase: UploadPhase,
    /// Overall progress, 0–100. Informational only.
    pub percent: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Final upload status (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UploadStatus>,
    /// Error message (set on failure or retry).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadProgressEvent {
    pub fn new(upload_id: i64, job_id: &str, phase: UploadPhase, percent: u8, message: &str) -> Self {
        Self {
            upload_id,
            job_id: job_id.to_string(),
            phase,
            percent: percent.min(100),
            message: message.to_string(),
            timestamp: Utc::now(),
            status: None,
            error: None,
        }
    }

    pub fn completed(upload_id: i64, job_id: &str, status: UploadStatus, receipts: usize) -> Self {
        let mut event = Self::new(
            upload_id,
            job_id,
            UploadPhase::Completed,
            100,
            &format!("Processed {} receipt(s)", receipts),
        );
        event.status = Some(status);
        event
    }

    pub fn failed(upload_id: i64, job_id: &str, error: &str) -> Self {
        let mut event = Self::new(upload_id, job_id, UploadPhase::Failed, 100, "Processing failed");
        event.status = Some(UploadStatus::Failed);
        event.error = Some(error.to_string());
        event
    }
}

/// Broadcasts upload progress events to any number of subscribers.
#[derive(Clone)]
pub struct UploadProgressBroadcaster {
    sender: Arc<broadcast::Sender<UploadProgressEvent>>,
}

impl UploadProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: UploadProgressEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one job run.
    pub fn tracker(&self, upload_id: i64, job_id: &str) -> UploadProgressTracker {
        UploadProgressTracker::new(upload_id, job_id, Arc::clone(&self.sender))
    }
}

impl Default for UploadProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Sends events for a single upload job run.
pub struct UploadProgressTracker {
    upload_id: i64,
    job_id: String,
    sender: Arc<broadcast::Sender<UploadProgressEvent>>,
}

impl UploadProgressTracker {
    pub fn new(
        upload_id: i64,
        job_id: &str,
        sender: Arc<broadcast::Sender<UploadProgressEvent>>,
    ) -> Self {
        Self {
            upload_id,
            job_id: job_id.to_string(),
            sender,
        }
    }

    pub fn update(&self, phase: UploadPhase, percent: u8, message: &str) {
        let event = UploadProgressEvent::new(self.upload_id, &self.job_id, phase, percent, message);
        let _ = self.sender.send(event);
    }

    pub fn completed(&self, status: UploadStatus, receipts: usize) {
        let event = UploadProgressEvent::completed(self.upload_id, &self.job_id, status, receipts);
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, error: &str) {
        let event = UploadProgressEvent::failed(self.upload_id, &self.job_id, error);
        let _ = self.sender.send(event);
    }

    pub fn retrying(&self, attempt: u32, error: &str) {
        let mut event = UploadProgressEvent::new(
            self.upload_id,
            &self.job_id,
            UploadPhase::Retrying,
            0,
            &format!("Attempt {} failed, retrying", attempt),
        );
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }
}
