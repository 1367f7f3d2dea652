use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Interaction {0} not found")]
    NotFound(String),
    #[error("Invalid reward {0}: must be finite and within [-1.0, 1.0]")]
    InvalidReward(f64),
    #[error("Corrupt interaction log at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
