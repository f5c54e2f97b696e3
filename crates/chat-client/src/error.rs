//! Error types for chat persistence calls.

use thiserror::Error;

/// Error type for all chat client operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Supabase returned a non-success status.
    #[error("Supabase error: {status} - {message}")]
    Supabase {
        /// The HTTP status code returned by Supabase.
        status: u16,
        /// The response body, typically containing error details.
        message: String,
    },

    /// Request or response body did not match the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid API URL or missing key.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No access token to call with.
    #[error("Not logged in")]
    NotLoggedIn,
}

impl ChatError {
    /// The backend refused the access token. The caller should treat the
    /// session as gone.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ChatError::Supabase { status: 401 | 403, .. })
    }
}

/// Convenience Result type alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
