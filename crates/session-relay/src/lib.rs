//! Background relay for the session-sync protocol.
//!
//! The relay is the only context that writes the canonical token. Page
//! bridges and session mirrors send it `SYNC_TOKEN` messages; it persists
//! each one and fans it out to everyone else.

mod error;
mod relay;

pub use error::{RelayError, RelayResult};
pub use relay::SessionRelay;
