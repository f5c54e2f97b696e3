//! The in-process bus hub.

use crate::{BusError, BusResult, MatchPattern, CONTEXT_INVALIDATED};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use sync_protocol_types::{ContextId, RelayReply, RelayRequest, SendOutcome, SessionMessage, TabId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

/// Who sent a request to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// An extension page (popup / side panel).
    Page(ContextId),
    /// A content script in a tab.
    Tab(TabId),
    /// Host code outside any context (CLI, tests).
    Host,
}

/// One request waiting for the relay, with its reply slot.
#[derive(Debug)]
pub struct RelayEnvelope {
    pub request: RelayRequest,
    pub origin: MessageOrigin,
    reply: oneshot::Sender<RelayReply>,
}

impl RelayEnvelope {
    /// Answer the sender. A sender that stopped waiting is not an error.
    pub fn reply(self, reply: RelayReply) {
        let _ = self.reply.send(reply);
    }
}

/// Receiving side of the relay registration.
pub struct RelayInbox {
    rx: mpsc::UnboundedReceiver<RelayEnvelope>,
}

impl RelayInbox {
    /// Next request, or `None` once the bus invalidated the relay.
    pub async fn recv(&mut self) -> Option<RelayEnvelope> {
        self.rx.recv().await
    }
}

/// Receiving side of a connected extension page.
pub struct PagePort {
    id: ContextId,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl PagePort {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Next broadcast, or `None` once disconnected.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        self.rx.recv().await
    }

    /// Next queued broadcast without waiting.
    pub fn try_recv(&mut self) -> Option<SessionMessage> {
        self.rx.try_recv().ok()
    }
}

/// Receiving side of a content-script listener in a tab.
pub struct TabPort {
    tab_id: TabId,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl TabPort {
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Next message for this tab, or `None` once detached.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        self.rx.recv().await
    }

    /// Next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<SessionMessage> {
        self.rx.try_recv().ok()
    }
}

struct TabEntry {
    url: String,
    listener: Option<mpsc::UnboundedSender<SessionMessage>>,
}

struct Inner {
    relay: RwLock<Option<mpsc::UnboundedSender<RelayEnvelope>>>,
    pages: RwLock<HashMap<ContextId, mpsc::UnboundedSender<SessionMessage>>>,
    tabs: RwLock<BTreeMap<TabId, TabEntry>>,
    next_context: AtomicU64,
    next_tab: AtomicU32,
    invalidated: AtomicBool,
    /// Bumped on every invalidation.
    generation: AtomicU64,
}

/// Ephemeral message bus of one extension instance.
///
/// Delivery is at-most-once and reaches running listeners only; nothing is
/// queued for contexts that are not connected. Cloning shares the hub.
///
/// Each handle belongs to one extension generation. A handle from before
/// an [`invalidate`](Self::invalidate) stays orphaned for good, even after
/// the extension is reloaded.
#[derive(Clone)]
pub struct ExtensionBus {
    inner: Arc<Inner>,
    generation: u64,
}

impl ExtensionBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                relay: RwLock::new(None),
                pages: RwLock::new(HashMap::new()),
                tabs: RwLock::new(BTreeMap::new()),
                next_context: AtomicU64::new(1),
                next_tab: AtomicU32::new(1),
                invalidated: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            generation: 0,
        }
    }

    fn ensure_valid(&self) -> BusResult<()> {
        if self.is_invalidated() {
            return Err(BusError::ContextInvalidated);
        }
        Ok(())
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::SeqCst)
            || self.generation != self.inner.generation.load(Ordering::SeqCst)
    }

    // ==========================================
    // Relay
    // ==========================================

    /// Register the relay. Only one relay may be live at a time.
    pub fn register_relay(&self) -> BusResult<RelayInbox> {
        self.ensure_valid()?;
        let mut relay = self.inner.relay.write();
        if relay.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(BusError::RelayAlreadyRegistered);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *relay = Some(tx);
        info!("relay registered on bus");
        Ok(RelayInbox { rx })
    }

    /// Send a request to the relay and wait for its reply.
    pub async fn send_to_relay(
        &self,
        origin: MessageOrigin,
        request: RelayRequest,
    ) -> BusResult<RelayReply> {
        self.ensure_valid()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = RelayEnvelope {
            request,
            origin,
            reply: reply_tx,
        };

        {
            let relay = self.inner.relay.read();
            let tx = relay
                .as_ref()
                .ok_or_else(|| BusError::NoReceiver("relay".to_string()))?;
            tx.send(envelope)
                .map_err(|_| BusError::NoReceiver("relay".to_string()))?;
        }

        reply_rx.await.map_err(|_| {
            if self.is_invalidated() {
                BusError::ContextInvalidated
            } else {
                BusError::ConnectionClosed
            }
        })
    }

    // ==========================================
    // Extension pages
    // ==========================================

    /// Connect an extension page (popup / side panel).
    pub fn connect_page(&self) -> BusResult<PagePort> {
        self.ensure_valid()?;
        let id = ContextId(self.inner.next_context.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.pages.write().insert(id, tx);
        debug!(context = %id, "extension page connected");
        Ok(PagePort { id, rx })
    }

    /// Disconnect an extension page. Dropping its port has the same effect.
    pub fn disconnect_page(&self, id: ContextId) {
        if self.inner.pages.write().remove(&id).is_some() {
            debug!(context = %id, "extension page disconnected");
        }
    }

    /// Number of live extension pages.
    pub fn page_count(&self) -> usize {
        let mut pages = self.inner.pages.write();
        pages.retain(|_, tx| !tx.is_closed());
        pages.len()
    }

    /// Deliver to every running extension page except `skip`, the page a
    /// message came from. `NoReceiver` when no other page is running.
    pub fn broadcast_to_extension(
        &self,
        message: &SessionMessage,
        skip: Option<ContextId>,
    ) -> SendOutcome {
        if self.is_invalidated() {
            return SendOutcome::Failed(CONTEXT_INVALIDATED.to_string());
        }
        let mut pages = self.inner.pages.write();
        let mut delivered = 0usize;
        pages.retain(|id, tx| {
            if Some(*id) == skip {
                return !tx.is_closed();
            }
            match tx.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    trace!(context = %id, "pruning closed extension page");
                    false
                }
            }
        });
        if delivered > 0 {
            SendOutcome::Delivered
        } else {
            SendOutcome::NoReceiver
        }
    }

    // ==========================================
    // Tabs
    // ==========================================

    /// Open a tab at `url`. No content script is attached yet.
    pub fn open_tab(&self, url: impl Into<String>) -> TabId {
        let id = TabId(self.inner.next_tab.fetch_add(1, Ordering::SeqCst));
        let url = url.into();
        debug!(tab_id = %id, url = %url, "tab opened");
        self.inner.tabs.write().insert(id, TabEntry { url, listener: None });
        id
    }

    /// Navigate a tab. The old document's content script goes away.
    pub fn navigate_tab(&self, tab_id: TabId, url: impl Into<String>) -> BusResult<()> {
        let mut tabs = self.inner.tabs.write();
        let entry = tabs.get_mut(&tab_id).ok_or(BusError::UnknownTab(tab_id))?;
        entry.url = url.into();
        entry.listener = None;
        debug!(tab_id = %tab_id, url = %entry.url, "tab navigated");
        Ok(())
    }

    /// Close a tab.
    pub fn close_tab(&self, tab_id: TabId) -> BusResult<()> {
        self.inner
            .tabs
            .write()
            .remove(&tab_id)
            .map(|_| debug!(tab_id = %tab_id, "tab closed"))
            .ok_or(BusError::UnknownTab(tab_id))
    }

    /// URL currently loaded in a tab.
    pub fn tab_url(&self, tab_id: TabId) -> Option<String> {
        self.inner.tabs.read().get(&tab_id).map(|t| t.url.clone())
    }

    /// Attach a content-script listener, replacing any previous one.
    pub fn attach_tab_listener(&self, tab_id: TabId) -> BusResult<TabPort> {
        self.ensure_valid()?;
        let mut tabs = self.inner.tabs.write();
        let entry = tabs.get_mut(&tab_id).ok_or(BusError::UnknownTab(tab_id))?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry.listener = Some(tx);
        debug!(tab_id = %tab_id, "content script attached");
        Ok(TabPort { tab_id, rx })
    }

    /// Detach the content-script listener of a tab.
    pub fn detach_tab_listener(&self, tab_id: TabId) {
        if let Some(entry) = self.inner.tabs.write().get_mut(&tab_id) {
            entry.listener = None;
        }
    }

    /// Tabs whose URL matches any of `patterns`, in tab-id order.
    pub fn query_tabs(&self, patterns: &[MatchPattern]) -> Vec<TabId> {
        self.inner
            .tabs
            .read()
            .iter()
            .filter(|(_, entry)| patterns.iter().any(|p| p.matches(&entry.url)))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Deliver to the content script of one tab.
    pub fn send_to_tab(&self, tab_id: TabId, message: &SessionMessage) -> SendOutcome {
        if self.is_invalidated() {
            return SendOutcome::Failed(CONTEXT_INVALIDATED.to_string());
        }
        let mut tabs = self.inner.tabs.write();
        let Some(entry) = tabs.get_mut(&tab_id) else {
            return SendOutcome::Failed(BusError::UnknownTab(tab_id).to_string());
        };
        let Some(listener) = entry.listener.as_ref() else {
            return SendOutcome::NoReceiver;
        };
        match listener.send(message.clone()) {
            Ok(()) => SendOutcome::Delivered,
            Err(_) => {
                entry.listener = None;
                SendOutcome::NoReceiver
            }
        }
    }

    // ==========================================
    // Lifecycle
    // ==========================================

    /// Simulate an extension reload: every endpoint is orphaned.
    ///
    /// Pending relay requests fail, ports see end-of-stream, and further
    /// sends from orphaned contexts fail with [`BusError::ContextInvalidated`].
    pub fn invalidate(&self) {
        self.inner.invalidated.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.relay.write() = None;
        self.inner.pages.write().clear();
        for entry in self.inner.tabs.write().values_mut() {
            entry.listener = None;
        }
        info!("extension context invalidated");
    }

    /// Bring the extension back after [`invalidate`](Self::invalidate) and
    /// return a handle for contexts started from now on. Contexts from
    /// before the reload stay orphaned.
    pub fn reload(&self) -> ExtensionBus {
        self.inner.invalidated.store(false, Ordering::SeqCst);
        info!("extension reloaded");
        ExtensionBus {
            inner: self.inner.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExtensionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_protocol_types::{RelayAck, SyncSource, TokenPair};

    fn web_sync(access: &str) -> SessionMessage {
        SessionMessage::signed_in(SyncSource::Web, TokenPair::new(access, "r1"))
    }

    fn patterns() -> Vec<MatchPattern> {
        vec![MatchPattern::parse("http://localhost:5173/*").unwrap()]
    }

    #[tokio::test]
    async fn test_relay_round_trip() {
        let bus = ExtensionBus::new();
        let mut inbox = bus.register_relay().unwrap();

        let relay = tokio::spawn(async move {
            let envelope = inbox.recv().await.unwrap();
            assert_eq!(envelope.origin, MessageOrigin::Host);
            envelope.reply(RelayReply::Synced(RelayAck {
                extension: SendOutcome::NoReceiver,
                tabs: vec![],
            }));
        });

        let reply = bus
            .send_to_relay(MessageOrigin::Host, RelayRequest::Sync(web_sync("abc")))
            .await
            .unwrap();
        assert!(matches!(reply, RelayReply::Synced(_)));
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_relay() {
        let bus = ExtensionBus::new();
        let err = bus
            .send_to_relay(MessageOrigin::Host, RelayRequest::GetAuthStatus)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoReceiver(_)));
    }

    #[tokio::test]
    async fn test_second_relay_rejected_while_first_alive() {
        let bus = ExtensionBus::new();
        let inbox = bus.register_relay().unwrap();
        assert_eq!(bus.register_relay().err(), Some(BusError::RelayAlreadyRegistered));
        drop(inbox);
        assert!(bus.register_relay().is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_to_extension_pages() {
        let bus = ExtensionBus::new();
        assert_eq!(bus.broadcast_to_extension(&web_sync("abc"), None), SendOutcome::NoReceiver);

        let mut a = bus.connect_page().unwrap();
        let mut b = bus.connect_page().unwrap();
        assert_eq!(bus.broadcast_to_extension(&web_sync("abc"), None), SendOutcome::Delivered);
        assert_eq!(a.recv().await.unwrap(), web_sync("abc"));
        assert_eq!(b.recv().await.unwrap(), web_sync("abc"));

        assert_eq!(
            bus.broadcast_to_extension(&web_sync("def"), Some(a.id())),
            SendOutcome::Delivered
        );
        assert_eq!(b.recv().await.unwrap(), web_sync("def"));
        assert!(a.try_recv().is_none());

        drop(a);
        assert_eq!(
            bus.broadcast_to_extension(&web_sync("x"), Some(b.id())),
            SendOutcome::NoReceiver
        );
        bus.disconnect_page(b.id());
        assert_eq!(bus.broadcast_to_extension(&web_sync("x"), None), SendOutcome::NoReceiver);
        assert_eq!(bus.page_count(), 0);
    }

    #[test]
    fn test_query_tabs_and_per_tab_outcomes() {
        let bus = ExtensionBus::new();
        let app = bus.open_tab("http://localhost:5173/");
        let other = bus.open_tab("https://news.example.com/");
        let bare = bus.open_tab("http://localhost:5173/chat");

        let mut port = bus.attach_tab_listener(app).unwrap();
        assert_eq!(bus.query_tabs(&patterns()), vec![app, bare]);

        assert_eq!(bus.send_to_tab(app, &web_sync("abc")), SendOutcome::Delivered);
        assert_eq!(bus.send_to_tab(bare, &web_sync("abc")), SendOutcome::NoReceiver);
        assert!(bus.send_to_tab(TabId(999), &web_sync("abc")).is_failed());
        assert_eq!(port.try_recv(), Some(web_sync("abc")));
        assert!(bus.query_tabs(&patterns()).iter().all(|t| *t != other));
    }

    #[test]
    fn test_navigation_drops_listener() {
        let bus = ExtensionBus::new();
        let tab = bus.open_tab("http://localhost:5173/");
        let _port = bus.attach_tab_listener(tab).unwrap();

        bus.navigate_tab(tab, "https://elsewhere.test/").unwrap();
        assert!(bus.query_tabs(&patterns()).is_empty());
        assert_eq!(bus.send_to_tab(tab, &web_sync("abc")), SendOutcome::NoReceiver);

        bus.close_tab(tab).unwrap();
        assert_eq!(bus.close_tab(tab), Err(BusError::UnknownTab(tab)));
    }

    #[tokio::test]
    async fn test_invalidate_orphans_everything() {
        let bus = ExtensionBus::new();
        let mut inbox = bus.register_relay().unwrap();
        let mut page = bus.connect_page().unwrap();
        let tab = bus.open_tab("http://localhost:5173/");
        let mut port = bus.attach_tab_listener(tab).unwrap();

        bus.invalidate();

        assert!(inbox.recv().await.is_none());
        assert!(page.recv().await.is_none());
        assert!(port.recv().await.is_none());
        let err = bus
            .send_to_relay(MessageOrigin::Tab(tab), RelayRequest::GetAuthStatus)
            .await
            .unwrap_err();
        assert!(err.is_invalidated());
        assert_eq!(
            bus.broadcast_to_extension(&web_sync("abc"), None),
            SendOutcome::Failed(CONTEXT_INVALIDATED.to_string())
        );

        let fresh = bus.reload();
        assert!(fresh.register_relay().is_ok());
        assert!(!fresh.is_invalidated());
        // Handles from the old generation stay orphaned.
        assert!(bus.is_invalidated());
        assert!(matches!(
            bus.connect_page(),
            Err(BusError::ContextInvalidated)
        ));
    }
}
