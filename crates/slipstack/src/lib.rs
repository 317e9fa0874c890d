//! Receipt sheet ingestion.
//!
//! A photographed sheet is split into receipt regions, each region is
//! cropped and read by a vision model, the results are stored with their
//! line items and audit rows, and every processed receipt is scored against
//! the owner's earlier receipts for likely duplicates.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod duplicate;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use broadcast::{UploadPhase, UploadProgressBroadcaster, UploadProgressEvent};
pub use config::{load_config, Config, GeminiConfig, SchedulerConfig};
pub use db::Database;
pub use duplicate::{DuplicateCheck, DuplicateDetector};
pub use error::{ConfigError, ProcessError, Result, SlipstackError, StorageError, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, UploadOutcome};
pub use processor::{FieldExtractor, GeminiClient, Segmenter};
pub use service::{UploadService, UploadSummary};
pub use storage::FileStorage;
pub use worker::{JobQueue, JobResult, UploadRequest, WorkerPool};
