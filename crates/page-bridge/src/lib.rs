//! Content-script side of session sync.
//!
//! A [`PageBridge`] runs in every tab that matches the web-app patterns.
//! It watches the web app's session slot through a [`SessionObserver`]
//! and forwards each change to the relay with source `web`. Relay
//! broadcasts travel the other way into a [`PageSessionHandler`].
//!
//! The bridge is a pure forwarder: it never writes extension storage and
//! reads the canonical token only to replay it on injection.

mod bridge;
mod error;
mod handler;
mod observer;
mod session;

pub use bridge::{BridgeConfig, BridgeExit, BridgeMonitor, BridgeStats, PageBridge};
pub use error::{BridgeError, BridgeResult};
pub use handler::{PageSessionHandler, SlotSessionHandler};
pub use observer::{
    ObservedPageStorage, PageStorage, PageStorageEvent, PollingObserver, SessionObserver,
    StorageEventObserver,
};
pub use session::{encode_page_session, parse_page_session};
