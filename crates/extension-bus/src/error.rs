//! Bus error types.

use sync_protocol_types::TabId;
use thiserror::Error;

/// Message Chrome reports once the extension was reloaded under a live page.
pub const CONTEXT_INVALIDATED: &str = "Extension context invalidated.";

/// Bus error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The extension was reloaded or removed; this endpoint is orphaned
    #[error("{}", CONTEXT_INVALIDATED)]
    ContextInvalidated,

    /// Nobody is listening on the other end
    #[error("Could not establish connection. Receiving end does not exist: {0}")]
    NoReceiver(String),

    /// The receiver dropped the request without replying
    #[error("The message port closed before a response was received")]
    ConnectionClosed,

    /// Tab does not exist (closed or never opened)
    #[error("No tab with id: {0}")]
    UnknownTab(TabId),

    /// A relay is already registered on this bus
    #[error("Relay already registered")]
    RelayAlreadyRegistered,

    /// Match pattern could not be parsed
    #[error("Invalid match pattern: {0}")]
    InvalidPattern(String),
}

impl BusError {
    /// Whether this endpoint can never send again.
    pub fn is_invalidated(&self) -> bool {
        matches!(self, BusError::ContextInvalidated)
    }
}

/// Result type alias using BusError.
pub type BusResult<T> = Result<T, BusError>;
