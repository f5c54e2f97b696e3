//! Typed access to the canonical token slot.

use crate::{KeyValueStore, StorageChange, StorageError, StorageKeys, StorageResult};
use serde_json::Value;
use std::sync::Arc;
use sync_protocol_types::{describe, Token, TokenPair};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

/// Decode a stored value into a token snapshot. Absent and `null` both mean
/// "signed out".
pub fn decode_token(value: Option<&Value>) -> StorageResult<Token> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value::<TokenPair>(v.clone())
            .map(Some)
            .map_err(|e| StorageError::Encoding(format!("malformed {}: {}", StorageKeys::SUPABASE_TOKEN, e))),
    }
}

/// Encode a credential pair for storage.
pub fn encode_token(pair: &TokenPair) -> StorageResult<Value> {
    Ok(serde_json::to_value(pair)?)
}

/// Read-only view of the canonical token, available to every context.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current canonical token.
    pub async fn read_token(&self) -> StorageResult<Token> {
        let value = self.store.get(StorageKeys::SUPABASE_TOKEN).await?;
        decode_token(value.as_ref())
    }

    /// Subscribe to canonical token changes from this point on.
    pub fn watch(&self) -> TokenWatch {
        TokenWatch {
            rx: self.store.subscribe(),
        }
    }
}

/// A change of the canonical token slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenChange {
    pub old: Token,
    pub new: Token,
}

/// Stream of canonical token changes. Changes to other keys are skipped.
pub struct TokenWatch {
    rx: broadcast::Receiver<StorageChange>,
}

impl TokenWatch {
    /// Wait for the next token change. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<TokenChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if let Some(token_change) = to_token_change(change) {
                        return Some(token_change);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "token watch lagged; later changes still carry full snapshots");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued token change, without waiting.
    pub fn try_recv(&mut self) -> Option<TokenChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) => {
                    if let Some(token_change) = to_token_change(change) {
                        return Some(token_change);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "token watch lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

fn to_token_change(change: StorageChange) -> Option<TokenChange> {
    if change.key != StorageKeys::SUPABASE_TOKEN {
        return None;
    }
    // A malformed snapshot is treated as absent, same as an invalid token.
    let decode = |value: Option<&Value>| match decode_token(value) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "ignoring malformed stored token");
            None
        }
    };
    Some(TokenChange {
        old: decode(change.old_value.as_ref()),
        new: decode(change.new_value.as_ref()),
    })
}

/// Write handle for the canonical token slot.
///
/// Only the relay holds one; every other context funnels writes through
/// the relay as messages.
#[derive(Clone)]
pub struct CanonicalTokenWriter {
    store: Arc<dyn KeyValueStore>,
}

impl CanonicalTokenWriter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Replace the canonical token. `None` removes the slot.
    pub async fn write(&self, token: &Token) -> StorageResult<()> {
        match token {
            Some(pair) => {
                let value = encode_token(pair)?;
                self.store.set(StorageKeys::SUPABASE_TOKEN, value).await?;
            }
            None => self.store.remove(StorageKeys::SUPABASE_TOKEN).await?,
        }
        debug!(token = %describe(token), "canonical token written");
        Ok(())
    }

    /// Remove the canonical token.
    pub async fn clear(&self) -> StorageResult<()> {
        self.write(&None).await
    }

    /// Read-only view over the same store.
    pub fn reader(&self) -> TokenStore {
        TokenStore::new(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, TokenStore, CanonicalTokenWriter) {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn KeyValueStore> = store.clone();
        (
            store,
            TokenStore::new(dyn_store.clone()),
            CanonicalTokenWriter::new(dyn_store),
        )
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (raw, reader, writer) = setup();
        let token = Some(TokenPair::new("abc", "r1"));

        writer.write(&token).await.unwrap();

        assert_eq!(reader.read_token().await.unwrap(), token);
        assert_eq!(
            raw.get(StorageKeys::SUPABASE_TOKEN).await.unwrap(),
            Some(json!({"access_token": "abc", "refresh_token": "r1"}))
        );
    }

    #[tokio::test]
    async fn test_clear_removes_slot() {
        let (raw, reader, writer) = setup();
        writer.write(&Some(TokenPair::new("abc", "r1"))).await.unwrap();
        writer.clear().await.unwrap();

        assert_eq!(reader.read_token().await.unwrap(), None);
        assert!(!raw.has(StorageKeys::SUPABASE_TOKEN).await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_filters_other_keys() {
        let (raw, reader, writer) = setup();
        let mut watch = reader.watch();

        raw.set("unrelated", json!(1)).await.unwrap();
        writer.write(&Some(TokenPair::new("abc", "r1"))).await.unwrap();
        writer.clear().await.unwrap();

        let first = watch.recv().await.unwrap();
        assert_eq!(first.old, None);
        assert_eq!(first.new, Some(TokenPair::new("abc", "r1")));

        let second = watch.try_recv().unwrap();
        assert_eq!(second.old, Some(TokenPair::new("abc", "r1")));
        assert_eq!(second.new, None);

        assert!(watch.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_malformed_value() {
        let (raw, reader, _) = setup();
        let mut watch = reader.watch();
        raw.set(StorageKeys::SUPABASE_TOKEN, json!("not-an-object"))
            .await
            .unwrap();

        assert!(matches!(
            reader.read_token().await,
            Err(StorageError::Encoding(_))
        ));
        let change = watch.recv().await.unwrap();
        assert_eq!(change.new, None);
    }

    #[test]
    fn test_decode_null_is_signed_out() {
        assert_eq!(decode_token(Some(&Value::Null)).unwrap(), None);
        assert_eq!(decode_token(None).unwrap(), None);
    }
}
