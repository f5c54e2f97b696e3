//! CLI command implementations.
//!
//! Every command except `demo` runs a real extension in-process: the relay
//! over the file-backed store under the base dir, plus one popup whose
//! mirror talks to Supabase. That is the same path the popup takes when it
//! opens, so `status` reports what the popup would show.

mod auth;
mod chats;
mod demo;

pub use auth::{login, logout, status};
pub use chats::{chats_delete, chats_list, chats_messages, chats_send};
pub use demo::demo;

use anyhow::{Context, Result};
use auth_backend::SupabaseAuthClient;
use extension_runtime::{ExtensionRuntime, Popup};
use session_mirror::MirrorSnapshot;
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::{Config, Paths};
use token_storage::FileStore;
use tracing::debug;

/// How long a popup may take to validate the stored session.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

/// A running extension with one popup open.
pub(crate) struct PopupSession {
    pub runtime: ExtensionRuntime,
    pub popup: Popup,
}

impl PopupSession {
    /// Start the extension over the on-disk store and open a popup.
    pub async fn open(config: &Config, paths: &Paths) -> Result<Self> {
        paths.ensure_dirs()?;
        let store = FileStore::open_default(paths)
            .await
            .with_context(|| format!("opening {}", paths.store_file().display()))?;
        let runtime = ExtensionRuntime::from_config(config, Arc::new(store))?;
        let auth = SupabaseAuthClient::new(
            config.supabase_url.clone(),
            config.supabase_publishable_key.clone(),
        );
        let popup = runtime.open_popup(Arc::new(auth))?;
        debug!(context = %popup.handle.context(), "popup session opened");
        Ok(Self { runtime, popup })
    }

    /// Wait until the popup is done adopting whatever the store held.
    pub async fn settled(&self) -> Result<MirrorSnapshot> {
        let snapshot = self
            .popup
            .handle
            .wait_until(SETTLE_TIMEOUT, |s| {
                !s.ui.loading && !s.ui.auth_state.is_transient()
            })
            .await?;
        Ok(snapshot)
    }

    /// The settled snapshot's access token, or an error when signed out.
    pub async fn access_token(&self) -> Result<String> {
        let snapshot = self.settled().await?;
        match snapshot.session_access_token {
            Some(token) if snapshot.ui.is_signed_in() => Ok(token),
            _ => anyhow::bail!("Not logged in. Run 'tabsync login' first"),
        }
    }

    pub async fn close(self) {
        self.popup.close().await;
    }
}
