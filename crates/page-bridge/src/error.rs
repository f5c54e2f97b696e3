//! Bridge error types.

use thiserror::Error;

/// Page bridge error type.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Bus error (attach failed, context invalidated)
    #[error("Bus error: {0}")]
    Bus(#[from] extension_bus::BusError),

    /// Storage error while reading the canonical token
    #[error("Storage error: {0}")]
    Storage(#[from] token_storage::StorageError),

    /// Session JSON could not be produced
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using BridgeError.
pub type BridgeResult<T> = Result<T, BridgeError>;
