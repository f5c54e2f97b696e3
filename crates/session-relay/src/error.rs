//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bus registration or messaging error
    #[error("Bus error: {0}")]
    Bus(#[from] extension_bus::BusError),

    /// Canonical store error
    #[error("Storage error: {0}")]
    Storage(#[from] token_storage::StorageError),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
