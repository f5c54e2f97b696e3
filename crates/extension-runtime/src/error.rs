//! Runtime error types.

use thiserror::Error;

/// Error type for wiring and driving the extension contexts.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Bus error: {0}")]
    Bus(#[from] extension_bus::BusError),

    #[error("Relay error: {0}")]
    Relay(#[from] session_relay::RelayError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] session_mirror::MirrorError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] page_bridge::BridgeError),

    #[error("Storage error: {0}")]
    Storage(#[from] token_storage::StorageError),

    #[error("Auth error: {0}")]
    Auth(#[from] auth_backend::AuthError),

    /// A convergence wait ran out
    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// Result type alias using RuntimeError.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
