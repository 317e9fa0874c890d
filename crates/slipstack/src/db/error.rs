//! Errors raised by the persistence gateway.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be prepared.
    #[error("cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema migration v{version} did not apply: {reason}")]
    Migration { version: u32, reason: String },

    /// Keywords, metadata or match factors failed to encode as JSON.
    #[error("json column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection mutex poisoned by a panicking holder")]
    LockPoisoned,
}
