use thiserror::Error;

/// Result type for link store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    /// Two different targets fingerprint to the same short code.
    #[error("short code {code} is bound to '{stored}', refusing '{requested}'")]
    HashCollision {
        code: String,
        stored: String,
        requested: String,
    },
    #[error("storage operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code was deleted: {0}")]
    Gone(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("deletion pipeline error: {0}")]
    Pipeline(String),
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Unavailable(message) | StorageError::Timeout(message) => {
                Self::BackendUnavailable(message)
            }
            other => Self::Storage(other.to_string()),
        }
    }
}
