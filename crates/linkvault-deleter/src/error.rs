use linkvault_core::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The pipeline was stopped; no further tasks are accepted.
    #[error("deletion pipeline is closed")]
    Closed,
    #[error("invalid batch settings: {0}")]
    InvalidSettings(String),
    #[error("bulk soft delete failed: {0}")]
    Flush(#[from] StorageError),
    #[error("dispatcher task failed: {0}")]
    Join(String),
}
