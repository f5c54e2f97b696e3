//! Extension local storage for the session-sync workspace.
//!
//! This crate provides the persistent key-value store every context can see:
//! - **[`MemoryStore`]**: in-process store, used by tests and the demo runtime
//! - **[`FileStore`]**: JSON file under `~/.tabsync`, used by the CLI
//!
//! Both emit a [`StorageChange`] for every effective write, delivered to all
//! subscribers including the writer. On top of the raw store sit
//! [`TokenStore`] (read / watch the canonical token) and
//! [`CanonicalTokenWriter`] (the relay's write handle).

mod error;
mod file;
mod keys;
mod memory;
mod token;
mod traits;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use keys::StorageKeys;
pub use memory::MemoryStore;
pub use token::{decode_token, encode_token, CanonicalTokenWriter, TokenChange, TokenStore, TokenWatch};
pub use traits::{KeyValueStore, StorageChange};

/// Capacity of the change-notification channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;
