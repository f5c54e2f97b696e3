//! Mirror error types.

use thiserror::Error;

/// Mirror error type.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Backend auth error (credential errors are the only user-visible kind)
    #[error(transparent)]
    Auth(#[from] auth_backend::AuthError),

    /// Bus error
    #[error("Bus error: {0}")]
    Bus(#[from] extension_bus::BusError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] token_storage::StorageError),

    /// The mirror task is gone (popup closed)
    #[error("Session mirror is not running")]
    Closed,

    /// A wait condition did not hold in time
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl MirrorError {
    /// Message for the UI, if this error should be shown at all.
    pub fn user_message(&self) -> Option<String> {
        match self {
            MirrorError::Auth(e) if e.is_user_visible() => Some(e.user_message()),
            _ => None,
        }
    }
}

/// Result type alias using MirrorError.
pub type MirrorResult<T> = Result<T, MirrorError>;
