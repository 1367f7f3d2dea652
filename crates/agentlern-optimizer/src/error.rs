use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by progress callbacks.
pub type ProgressError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Progress callback failed: {0}")]
    Progress(ProgressError),
    #[error("Unreadable file {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
