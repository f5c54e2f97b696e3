//! One extension instance: the background relay plus whatever popups and
//! tabs are open against it.

use crate::{RuntimeError, RuntimeResult};
use auth_backend::AuthBackend;
use extension_bus::{parse_patterns, ExtensionBus, MatchPattern};
use page_bridge::{
    parse_page_session, BridgeConfig, BridgeExit, BridgeMonitor, BridgeStats, ObservedPageStorage,
    PageBridge, PageStorage, SlotSessionHandler,
};
use session_mirror::{MirrorHandle, SessionMirror};
use session_relay::SessionRelay;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::Config;
use sync_protocol_types::{TabId, Token};
use token_storage::{CanonicalTokenWriter, KeyValueStore, TokenStore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct ExtensionRuntime {
    bus: ExtensionBus,
    writer: CanonicalTokenWriter,
    patterns: Vec<MatchPattern>,
    bridge_config: BridgeConfig,
    relay: JoinHandle<()>,
}

impl ExtensionRuntime {
    /// Start the background relay over `store`.
    pub fn start(
        store: Arc<dyn KeyValueStore>,
        patterns: Vec<MatchPattern>,
        bridge_config: BridgeConfig,
    ) -> RuntimeResult<Self> {
        let bus = ExtensionBus::new();
        let writer = CanonicalTokenWriter::new(store);
        let relay = SessionRelay::new(writer.clone(), bus.clone(), patterns.clone()).spawn()?;
        info!(patterns = patterns.len(), "extension runtime started");
        Ok(Self {
            bus,
            writer,
            patterns,
            bridge_config,
            relay,
        })
    }

    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> RuntimeResult<Self> {
        let patterns = parse_patterns(&config.web_app_patterns)?;
        Self::start(store, patterns, BridgeConfig::from_config(config))
    }

    pub fn bus(&self) -> &ExtensionBus {
        &self.bus
    }

    /// Read-only view of the canonical token.
    pub fn tokens(&self) -> TokenStore {
        self.writer.reader()
    }

    pub fn bridge_config(&self) -> &BridgeConfig {
        &self.bridge_config
    }

    pub async fn canonical_token(&self) -> RuntimeResult<Token> {
        Ok(self.writer.reader().read_token().await?)
    }

    /// Open a popup backed by its own auth client.
    pub fn open_popup(&self, auth: Arc<dyn AuthBackend>) -> RuntimeResult<Popup> {
        let (handle, task) = SessionMirror::spawn(auth, self.writer.reader(), self.bus.clone())?;
        debug!(context = %handle.context(), "popup opened");
        Ok(Popup { handle, task })
    }

    /// Open a tab on `url` whose page storage is `page`. A bridge is
    /// injected only when the URL matches a web-app pattern.
    pub fn open_tab(&self, url: &str, page: ObservedPageStorage) -> RuntimeResult<Tab> {
        let tab_id = self.bus.open_tab(url);
        let mut tab = Tab {
            tab_id,
            page,
            session_key: self.bridge_config.session_key.clone(),
            bridge: None,
        };
        if self.patterns.iter().any(|p| p.matches(url)) {
            self.inject(&mut tab)?;
        } else {
            debug!(tab_id = %tab_id, "tab does not match web app patterns");
        }
        Ok(tab)
    }

    /// Page reload: a fresh bridge replaces whatever ran before.
    pub fn reload_tab(&self, tab: &mut Tab) -> RuntimeResult<()> {
        if let Some(old) = tab.bridge.take() {
            old.task.abort();
        }
        self.inject(tab)
    }

    pub fn close_tab(&self, tab: Tab) -> RuntimeResult<()> {
        self.bus.close_tab(tab.tab_id)?;
        Ok(())
    }

    /// Extension reload: every existing context is orphaned and a new relay
    /// starts. Tabs keep their orphaned bridges until reloaded.
    pub fn reload_extension(&mut self) -> RuntimeResult<()> {
        self.bus.invalidate();
        self.relay.abort();
        self.bus = self.bus.reload();
        self.relay = SessionRelay::new(self.writer.clone(), self.bus.clone(), self.patterns.clone())
            .spawn()?;
        info!("extension reloaded, relay restarted");
        Ok(())
    }

    /// Wait until the canonical token equals `expected`.
    pub async fn wait_for_token(&self, expected: &Token, timeout: Duration) -> RuntimeResult<()> {
        let reader = self.writer.reader();
        wait_until("canonical token", timeout, || {
            let reader = reader.clone();
            async move { reader.read_token().await.ok().as_ref() == Some(expected) }
        })
        .await
    }

    fn inject(&self, tab: &mut Tab) -> RuntimeResult<()> {
        let handler = Arc::new(SlotSessionHandler::new(
            Arc::new(tab.page.clone()),
            tab.session_key.clone(),
        ));
        let bridge = PageBridge::attach(
            self.bus.clone(),
            tab.tab_id,
            self.writer.reader(),
            handler,
            &self.bridge_config,
        )?;
        let monitor = bridge.monitor();
        let task = bridge.spawn(tab.page.observe(tab.session_key.clone()));
        tab.bridge = Some(RunningBridge { monitor, task });
        Ok(())
    }
}

impl Drop for ExtensionRuntime {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

/// An open popup.
pub struct Popup {
    pub handle: MirrorHandle,
    task: JoinHandle<()>,
}

impl Popup {
    /// Close the popup and wait for its mirror to stop.
    pub async fn close(self) {
        self.handle.shutdown().await;
        let _ = self.task.await;
    }
}

struct RunningBridge {
    monitor: BridgeMonitor,
    task: JoinHandle<BridgeExit>,
}

/// An open browser tab.
pub struct Tab {
    pub tab_id: TabId,
    pub page: ObservedPageStorage,
    session_key: String,
    bridge: Option<RunningBridge>,
}

impl Tab {
    /// What the page's session slot holds.
    pub fn session(&self) -> Token {
        parse_page_session(self.page.get_item(&self.session_key).as_deref())
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn bridge_stats(&self) -> Option<BridgeStats> {
        self.bridge.as_ref().map(|b| b.monitor.snapshot())
    }

    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    /// Wait for the bridge to stop and report why.
    pub async fn bridge_exit(&mut self) -> Option<BridgeExit> {
        let bridge = self.bridge.take()?;
        bridge.task.await.ok()
    }
}

impl Drop for Tab {
    fn drop(&mut self) {
        if let Some(bridge) = &self.bridge {
            bridge.task.abort();
        }
    }
}

/// Poll `check` until it yields true or `timeout` passes.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut check: F) -> RuntimeResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RuntimeError::Timeout(what.to_string()));
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}
