use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewardError {
    #[error("Invalid reward bounds: failure {failure} must be finite and <= success {success}")]
    InvalidBounds { failure: f64, success: f64 },
}

pub type Result<T> = std::result::Result<T, RewardError>;
