//! Page storage and the observers that watch the session slot.
//!
//! [`PageStorage`] is the page's localStorage surface. Watching it is kept
//! behind [`SessionObserver`] so the bridge does not care whether changes
//! are pushed ([`StorageEventObserver`]) or discovered by polling
//! ([`PollingObserver`]).

use crate::session::parse_page_session;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sync_protocol_types::Token;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const PAGE_EVENT_CAPACITY: usize = 64;

/// The page's origin-scoped key/value storage.
pub trait PageStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

/// A write to page storage, as seen by a storage listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStorageEvent {
    pub key: String,
    pub new_value: Option<String>,
}

/// In-memory page storage that announces every effective write.
#[derive(Clone)]
pub struct ObservedPageStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
    events: broadcast::Sender<PageStorageEvent>,
}

impl Default for ObservedPageStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservedPageStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(PAGE_EVENT_CAPACITY);
        Self {
            items: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageStorageEvent> {
        self.events.subscribe()
    }

    /// Push-based observer of `key`.
    pub fn observe(&self, key: impl Into<String>) -> StorageEventObserver {
        StorageEventObserver {
            storage: self.clone(),
            key: key.into(),
            rx: self.subscribe(),
        }
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        let _ = self.events.send(PageStorageEvent {
            key: key.to_string(),
            new_value,
        });
    }
}

impl PageStorage for ObservedPageStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        let mut items = self.items.lock();
        if items.get(key).map(String::as_str) == Some(value) {
            return;
        }
        items.insert(key.to_string(), value.to_string());
        self.notify(key, Some(value.to_string()));
    }

    fn remove_item(&self, key: &str) {
        let mut items = self.items.lock();
        if items.remove(key).is_some() {
            self.notify(key, None);
        }
    }
}

/// Source of session-slot changes for one page.
#[async_trait]
pub trait SessionObserver: Send {
    /// What the slot holds right now.
    fn current(&self) -> Token;

    /// Wait for the next change. `None` once the page is gone.
    async fn changed(&mut self) -> Option<Token>;
}

/// Observer driven by storage events.
pub struct StorageEventObserver {
    storage: ObservedPageStorage,
    key: String,
    rx: broadcast::Receiver<PageStorageEvent>,
}

#[async_trait]
impl SessionObserver for StorageEventObserver {
    fn current(&self) -> Token {
        parse_page_session(self.storage.get_item(&self.key).as_deref())
    }

    async fn changed(&mut self) -> Option<Token> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key == self.key => {
                    return Some(parse_page_session(event.new_value.as_deref()));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed writes collapse into the slot's present value.
                    warn!(skipped, "page storage events lagged");
                    return Some(self.current());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Fallback observer that re-reads the slot on a fixed interval and reports
/// only when the parsed session differs from the last read.
pub struct PollingObserver {
    storage: Arc<dyn PageStorage>,
    key: String,
    interval: tokio::time::Interval,
    last: Token,
}

impl PollingObserver {
    pub fn new(storage: Arc<dyn PageStorage>, key: impl Into<String>, every: Duration) -> Self {
        let key = key.into();
        let last = parse_page_session(storage.get_item(&key).as_deref());
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self {
            storage,
            key,
            interval,
            last,
        }
    }
}

#[async_trait]
impl SessionObserver for PollingObserver {
    fn current(&self) -> Token {
        parse_page_session(self.storage.get_item(&self.key).as_deref())
    }

    async fn changed(&mut self) -> Option<Token> {
        loop {
            self.interval.tick().await;
            let token = self.current();
            if token != self.last {
                debug!(key = %self.key, "poll found a session change");
                self.last = token.clone();
                return Some(token);
            }
        }
    }
}
