pub mod job;
pub mod pool;

pub use job::{JobResult, UploadRequest};
pub use pool::{backoff_delay, JobQueue, WorkerPool};
