pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;
pub mod validation;

pub use config::PipelineConfig;
pub use context::{PipelineContext, ReceiptOutcome, Stage, UploadOutcome};
pub use error::{PipelineError, PipelineWarning};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::Pipeline;
pub use validation::{validate_receipt, ValidationIssue};
