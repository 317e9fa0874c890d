//! Broadcasting of upload progress for real-time status streaming.

pub mod upload_progress;

pub use upload_progress::{
    UploadPhase, UploadProgressBroadcaster, UploadProgressEvent, UploadProgressTracker,
};
