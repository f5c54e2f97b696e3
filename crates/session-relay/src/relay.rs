//! The relay handler and its run loop.

use crate::RelayResult;
use extension_bus::{ExtensionBus, MatchPattern, MessageOrigin, RelayInbox};
use sync_protocol_types::{
    describe, RelayAck, RelayReply, RelayRequest, SessionMessage, TabDelivery,
};
use token_storage::CanonicalTokenWriter;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Single source of truth for the canonical token.
///
/// Every inbound `SYNC_TOKEN` is persisted first and then rebroadcast,
/// unchanged, to every other extension page and every matching web-app tab
/// (the sending tab included).
/// Requests are handled one at a time in receipt order; the relay never
/// inspects or deduplicates tokens.
pub struct SessionRelay {
    writer: CanonicalTokenWriter,
    bus: ExtensionBus,
    patterns: Vec<MatchPattern>,
}

impl SessionRelay {
    pub fn new(writer: CanonicalTokenWriter, bus: ExtensionBus, patterns: Vec<MatchPattern>) -> Self {
        Self {
            writer,
            bus,
            patterns,
        }
    }

    /// Handle one request from host code outside any context.
    pub async fn handle(&self, request: RelayRequest) -> RelayReply {
        self.handle_from(MessageOrigin::Host, request).await
    }

    /// Handle one request. An extension page is left out of the fan-out of
    /// its own sync.
    pub async fn handle_from(&self, origin: MessageOrigin, request: RelayRequest) -> RelayReply {
        match request {
            RelayRequest::Sync(message) => self.handle_sync(origin, message).await,
            RelayRequest::GetAuthStatus => self.auth_status().await,
        }
    }

    async fn handle_sync(&self, origin: MessageOrigin, message: SessionMessage) -> RelayReply {
        debug!(
            source = %message.source,
            token = %describe(&message.token),
            "sync received"
        );

        if let Err(e) = self.writer.write(&message.token).await {
            warn!(source = %message.source, error = %e, "failed to persist token; not rebroadcasting");
            return RelayReply::Rejected {
                reason: e.to_string(),
            };
        }

        let sender = match origin {
            MessageOrigin::Page(id) => Some(id),
            MessageOrigin::Tab(_) | MessageOrigin::Host => None,
        };
        let extension = self.bus.broadcast_to_extension(&message, sender);
        if extension.is_failed() {
            warn!(outcome = %extension, "extension broadcast failed");
        }

        let tabs: Vec<TabDelivery> = self
            .bus
            .query_tabs(&self.patterns)
            .into_iter()
            .map(|tab_id| {
                let outcome = self.bus.send_to_tab(tab_id, &message);
                if outcome.is_failed() {
                    warn!(tab_id = %tab_id, outcome = %outcome, "tab delivery failed");
                } else {
                    debug!(tab_id = %tab_id, outcome = %outcome, "tab delivery");
                }
                TabDelivery { tab_id, outcome }
            })
            .collect();

        let ack = RelayAck { extension, tabs };
        info!(
            source = %message.source,
            signed_in = message.token.is_some(),
            delivered = ack.delivered_count() as u64,
            "sync persisted and rebroadcast"
        );
        RelayReply::Synced(ack)
    }

    async fn auth_status(&self) -> RelayReply {
        match self.writer.reader().read_token().await {
            Ok(token) => RelayReply::AuthStatus {
                authenticated: token.is_some(),
                token,
            },
            Err(e) => {
                warn!(error = %e, "failed to read canonical token");
                RelayReply::AuthStatus {
                    authenticated: false,
                    token: None,
                }
            }
        }
    }

    /// Serve requests until the bus drops the inbox.
    pub async fn run(self, mut inbox: RelayInbox) {
        info!("relay running");
        while let Some(envelope) = inbox.recv().await {
            let request = envelope.request.clone();
            debug!(origin = ?envelope.origin, "relay request");
            let reply = self.handle_from(envelope.origin, request).await;
            envelope.reply(reply);
        }
        info!("relay stopped");
    }

    /// Register on the bus and serve in a background task.
    pub fn spawn(self) -> RelayResult<JoinHandle<()>> {
        let inbox = self.bus.register_relay()?;
        Ok(tokio::spawn(self.run(inbox)))
    }
}
