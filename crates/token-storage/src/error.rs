//! Storage error types.

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The store cannot be reached right now
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value does not have the expected shape
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Io(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::Unavailable("closed".into()).is_transient());
        assert!(StorageError::Io(std::io::Error::other("disk")).is_transient());
        assert!(!StorageError::Encoding("bad".into()).is_transient());
    }
}
