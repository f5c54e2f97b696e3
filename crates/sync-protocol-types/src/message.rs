//! Messages exchanged over the extension bus.

use crate::token::{Token, TokenPair};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message discriminator on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "SYNC_TOKEN")]
    SyncToken,
}

/// Context that originated a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    /// The web app's own page, forwarded by the page bridge.
    Web,
    /// A popup or side-panel session mirror.
    Popup,
    /// The extension itself (e.g. replaying the stored token into a page).
    Extension,
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncSource::Web => "web",
            SyncSource::Popup => "popup",
            SyncSource::Extension => "extension",
        };
        f.write_str(s)
    }
}

/// The unit of inter-context communication.
///
/// Always carries a complete token snapshot, never a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub source: SyncSource,
    #[serde(default)]
    pub token: Token,
}

impl SessionMessage {
    /// Build a `SYNC_TOKEN` message.
    pub fn sync(source: SyncSource, token: Token) -> Self {
        Self {
            message_type: MessageType::SyncToken,
            source,
            token,
        }
    }

    /// Build a sign-out (null token) message.
    pub fn sign_out(source: SyncSource) -> Self {
        Self::sync(source, None)
    }

    /// Build a sign-in message from a credential pair.
    pub fn signed_in(source: SyncSource, pair: TokenPair) -> Self {
        Self::sync(source, Some(pair))
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Requests the relay accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRequest {
    /// Persist and fan out a token snapshot.
    Sync(SessionMessage),
    /// Report the canonical token without writing anything.
    GetAuthStatus,
}

/// Replies produced by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayReply {
    /// The sync request was persisted and every delivery attempt settled.
    Synced(RelayAck),
    /// Current canonical token.
    AuthStatus { authenticated: bool, token: Token },
    /// The relay could not persist the token.
    Rejected { reason: String },
}

/// Acknowledgement for a sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAck {
    /// Outcome of the rebroadcast to extension pages.
    pub extension: SendOutcome,
    /// Per-tab outcomes, in the order the tabs were queried.
    pub tabs: Vec<TabDelivery>,
}

impl RelayAck {
    /// Number of receivers that actually got the message.
    pub fn delivered_count(&self) -> usize {
        let ext = usize::from(self.extension.is_delivered());
        ext + self.tabs.iter().filter(|t| t.outcome.is_delivered()).count()
    }
}

/// Outcome of delivering one message to one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabDelivery {
    pub tab_id: TabId,
    pub outcome: SendOutcome,
}

/// Result of a non-blocking send. Never fatal to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// At least one listener received the message.
    Delivered,
    /// Nobody was listening (popup closed, no content script in the tab).
    NoReceiver,
    /// The channel itself is gone (e.g. extension context invalidated).
    Failed(String),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SendOutcome::Failed(_))
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Delivered => f.write_str("delivered"),
            SendOutcome::NoReceiver => f.write_str("no_receiver"),
            SendOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// Identifier of a connected extension page (popup / side panel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}
