//! Ephemeral message bus between extension contexts.
//!
//! Models the browser's runtime / tabs messaging inside one process:
//! - the **relay** registers an inbox and answers request/response traffic
//! - **extension pages** (popup, side panel) receive broadcasts
//! - **tabs** carry a URL and at most one content-script listener
//!
//! Sends that reach nobody are reported as a [`SendOutcome`], never as an
//! error the caller must handle.
//!
//! [`SendOutcome`]: sync_protocol_types::SendOutcome

mod bus;
mod error;
mod pattern;

pub use bus::{ExtensionBus, MessageOrigin, PagePort, RelayEnvelope, RelayInbox, TabPort};
pub use error::{BusError, BusResult, CONTEXT_INVALIDATED};
pub use pattern::{parse_patterns, MatchPattern};
