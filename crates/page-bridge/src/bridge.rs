//! The page bridge: one per matching tab.
//!
//! Forwards every observed change of the page's session slot to the relay
//! exactly once and hands relay broadcasts to the page's
//! [`PageSessionHandler`]. On injection the canonical token is replayed only
//! into a page that holds no session of its own. It never writes extension
//! storage.

use crate::handler::PageSessionHandler;
use crate::observer::SessionObserver;
use crate::BridgeResult;
use extension_bus::{ExtensionBus, MessageOrigin, TabPort};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::Config;
use sync_protocol_types::{RelayRequest, SessionMessage, SyncSource, TabId, Token};
use token_storage::TokenStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bridge timing and slot location.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub session_key: String,
    pub initial_sync_delay: Duration,
    pub poll_interval: Duration,
}

impl BridgeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_key: config.page_session_key(),
            initial_sync_delay: Duration::from_millis(config.initial_sync_delay_ms),
            poll_interval: Duration::from_millis(config.page_poll_interval_ms),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Why a bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The tab closed or navigated away.
    TabClosed,
    /// The extension was reloaded under the page. Nothing is forwarded until
    /// the page itself reloads.
    ContextInvalidated,
    ObserverClosed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Messages sent to the relay.
    pub forwarded: u64,
    /// Relay broadcasts handed to the page.
    pub delivered: u64,
    /// Observed values that matched the last seen token.
    pub skipped: u64,
    /// Whether a stored token was replayed into an empty page on injection.
    pub replayed: bool,
}

/// Shared view of a running bridge's counters.
#[derive(Clone, Default)]
pub struct BridgeMonitor(Arc<Mutex<BridgeStats>>);

impl BridgeMonitor {
    pub fn snapshot(&self) -> BridgeStats {
        *self.0.lock()
    }

    fn update(&self, f: impl FnOnce(&mut BridgeStats)) {
        f(&mut self.0.lock());
    }
}

pub struct PageBridge {
    bus: ExtensionBus,
    tab_id: TabId,
    port: TabPort,
    tokens: TokenStore,
    handler: Arc<dyn PageSessionHandler>,
    initial_sync_delay: Duration,
    /// Last slot value forwarded, or delivered and accepted by the page.
    /// Outer `None` until the first one.
    last_seen: Option<Token>,
    monitor: BridgeMonitor,
}

impl PageBridge {
    /// Inject into `tab_id`: attaches the tab's message listener.
    pub fn attach(
        bus: ExtensionBus,
        tab_id: TabId,
        tokens: TokenStore,
        handler: Arc<dyn PageSessionHandler>,
        config: &BridgeConfig,
    ) -> BridgeResult<Self> {
        let port = bus.attach_tab_listener(tab_id)?;
        Ok(Self {
            bus,
            tab_id,
            port,
            tokens,
            handler,
            initial_sync_delay: config.initial_sync_delay,
            last_seen: None,
            monitor: BridgeMonitor::default(),
        })
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn monitor(&self) -> BridgeMonitor {
        self.monitor.clone()
    }

    pub fn spawn<O>(self, observer: O) -> JoinHandle<BridgeExit>
    where
        O: SessionObserver + 'static,
    {
        tokio::spawn(self.run(observer))
    }

    pub async fn run<O: SessionObserver>(mut self, mut observer: O) -> BridgeExit {
        info!(tab_id = %self.tab_id, "page bridge injected");
        self.replay_stored(observer.current()).await;

        let initial_sync = tokio::time::sleep(self.initial_sync_delay);
        tokio::pin!(initial_sync);
        let mut initial_done = false;

        let exit = loop {
            tokio::select! {
                biased;

                message = self.port.recv() => match message {
                    Some(message) => {
                        self.deliver(message);
                    }
                    None if self.bus.is_invalidated() => break BridgeExit::ContextInvalidated,
                    None => break BridgeExit::TabClosed,
                },
                change = observer.changed() => match change {
                    // Forward what the slot holds now; the event may be stale
                    // if a relay delivery was handled in between.
                    Some(_) => {
                        if let Some(exit) = self.forward(observer.current()).await {
                            break exit;
                        }
                    }
                    None => break BridgeExit::ObserverClosed,
                },
                _ = &mut initial_sync, if !initial_done => {
                    initial_done = true;
                    let current = observer.current();
                    if current.is_some() {
                        if let Some(exit) = self.forward(current).await {
                            break exit;
                        }
                    }
                }
            }
        };

        info!(tab_id = %self.tab_id, ?exit, "page bridge stopped");
        exit
    }

    /// Offer the stored token to a page that has no session yet. A session
    /// the page already holds wins and reaches the relay via the initial sync.
    async fn replay_stored(&mut self, page: Token) {
        let stored = match self.tokens.read_token().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(tab_id = %self.tab_id, error = %e, "could not read stored session");
                return;
            }
        };

        match (stored, page) {
            (None, _) => debug!(tab_id = %self.tab_id, "no stored session to replay"),
            (Some(stored), Some(page)) if stored == page => {
                debug!(tab_id = %self.tab_id, "page already holds the stored session");
                self.last_seen = Some(Some(page));
            }
            (Some(_), Some(_)) => {
                debug!(tab_id = %self.tab_id, "page holds its own session, not replaying");
            }
            (Some(stored), None) => {
                debug!(tab_id = %self.tab_id, "replaying stored session into page");
                if self.deliver(SessionMessage::sync(SyncSource::Extension, Some(stored))) {
                    self.monitor.update(|s| s.replayed = true);
                }
            }
        }
    }

    /// Hand a snapshot to the page. Returns whether the page accepted it.
    fn deliver(&mut self, message: SessionMessage) -> bool {
        match self.handler.deliver(&message) {
            Ok(()) => {
                self.last_seen = Some(message.token);
                self.monitor.update(|s| s.delivered += 1);
                true
            }
            Err(e) => {
                warn!(tab_id = %self.tab_id, error = %e, "page rejected session delivery");
                false
            }
        }
    }

    /// Send one observed value to the relay. Returns an exit reason once the
    /// extension context is gone; every other failure is dropped.
    async fn forward(&mut self, token: Token) -> Option<BridgeExit> {
        if self.last_seen.as_ref() == Some(&token) {
            self.monitor.update(|s| s.skipped += 1);
            return None;
        }
        self.last_seen = Some(token.clone());

        let request = RelayRequest::Sync(SessionMessage::sync(SyncSource::Web, token));
        match self
            .bus
            .send_to_relay(MessageOrigin::Tab(self.tab_id), request)
            .await
        {
            Ok(reply) => {
                self.monitor.update(|s| s.forwarded += 1);
                debug!(tab_id = %self.tab_id, ?reply, "page session forwarded");
                None
            }
            Err(e) if e.is_invalidated() => {
                info!(tab_id = %self.tab_id, "extension context invalidated, bridge going quiet");
                Some(BridgeExit::ContextInvalidated)
            }
            Err(e) => {
                debug!(tab_id = %self.tab_id, error = %e, "forward failed");
                None
            }
        }
    }
}
