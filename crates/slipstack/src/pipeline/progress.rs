use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::upload_progress::{UploadPhase, UploadProgressEvent, UploadProgressTracker};
use crate::db::models::UploadStatus;

/// Events emitted by the pipeline during processing.
pub enum ProgressEvent {
    Phase {
        phase: UploadPhase,
        percent: u8,
        message: String,
    },
    Completed {
        status: UploadStatus,
        receipts: usize,
    },
    Failed {
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Wraps an [`UploadProgressTracker`] to bridge pipeline events to the
/// broadcast channel.
pub struct BroadcastProgress {
    tracker: UploadProgressTracker,
}

impl BroadcastProgress {
    pub fn new(
        upload_id: i64,
        job_id: &str,
        sender: Arc<broadcast::Sender<UploadProgressEvent>>,
    ) -> Self {
        Self {
            tracker: UploadProgressTracker::new(upload_id, job_id, sender),
        }
    }

    pub fn from_tracker(tracker: UploadProgressTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &UploadProgressTracker {
        &self.tracker
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase {
                phase,
                percent,
                message,
            } => self.tracker.update(phase, percent, &message),
            ProgressEvent::Completed { status, receipts } => {
                self.tracker.completed(status, receipts)
            }
            ProgressEvent::Failed { error } => self.tracker.failed(&error),
        }
    }
}

/// Progress before processing region `index` of `count`: 15 plus the
/// completed share of 80.
pub fn region_percent(index: usize, count: usize) -> u8 {
    if count == 0 {
        return 95;
    }
    let share = (index as f64 / count as f64 * 80.0).round() as u8;
    15 + share.min(80)
}
