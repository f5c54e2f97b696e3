//! Delivery of relay broadcasts into the page.

use crate::observer::PageStorage;
use crate::session::encode_page_session;
use crate::BridgeResult;
use std::sync::Arc;
use sync_protocol_types::SessionMessage;
use tracing::debug;

/// Receives session snapshots relayed into the page. The web app decides
/// what adopting one means.
pub trait PageSessionHandler: Send + Sync {
    fn deliver(&self, message: &SessionMessage) -> BridgeResult<()>;
}

/// Default handler: writes the snapshot into the page's session slot, or
/// removes the slot for a null token.
pub struct SlotSessionHandler {
    storage: Arc<dyn PageStorage>,
    key: String,
}

impl SlotSessionHandler {
    pub fn new(storage: Arc<dyn PageStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }
}

impl PageSessionHandler for SlotSessionHandler {
    fn deliver(&self, message: &SessionMessage) -> BridgeResult<()> {
        match &message.token {
            Some(pair) => {
                let raw = encode_page_session(pair)?;
                self.storage.set_item(&self.key, &raw);
            }
            None => self.storage.remove_item(&self.key),
        }
        debug!(key = %self.key, source = %message.source, "session slot updated from relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObservedPageStorage;
    use crate::session::parse_page_session;
    use sync_protocol_types::{SyncSource, TokenPair};

    #[test]
    fn test_slot_written_and_removed() {
        let storage = Arc::new(ObservedPageStorage::new());
        let handler = SlotSessionHandler::new(storage.clone(), "slot");
        let pair = TokenPair::new("abc", "r1");

        handler
            .deliver(&SessionMessage::sync(SyncSource::Popup, Some(pair.clone())))
            .unwrap();
        assert_eq!(
            parse_page_session(storage.get_item("slot").as_deref()),
            Some(pair)
        );

        handler
            .deliver(&SessionMessage::sign_out(SyncSource::Popup))
            .unwrap();
        assert_eq!(storage.get_item("slot"), None);
    }
}
