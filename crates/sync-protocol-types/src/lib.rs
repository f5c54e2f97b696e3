//! Session-sync protocol types.
//!
//! Every context (page bridge, relay, session mirror) speaks in these types.
//! The JSON shape of [`SessionMessage`] matches what the web app posts:
//!
//! ```json
//! { "type": "SYNC_TOKEN", "source": "web", "token": { "access_token": "…", "refresh_token": "…" } }
//! ```

mod message;
mod token;

pub use message::{
    ContextId, MessageType, RelayAck, RelayReply, RelayRequest, SendOutcome, SessionMessage,
    SyncSource, TabDelivery, TabId,
};
pub use token::{access_token_of, describe, Token, TokenPair};
