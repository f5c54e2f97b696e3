//! Stand-in for the web application running in a matching tab.
//!
//! It owns its own auth client and keeps its session in the page's slot,
//! which is all the bridge ever sees of it.

use crate::RuntimeResult;
use auth_backend::AuthBackend;
use page_bridge::{encode_page_session, parse_page_session, BridgeError, ObservedPageStorage, PageStorage};
use std::sync::Arc;
use sync_protocol_types::Token;
use tracing::{debug, warn};

pub struct WebApp {
    auth: Arc<dyn AuthBackend>,
    page: ObservedPageStorage,
    session_key: String,
}

impl WebApp {
    pub fn new(auth: Arc<dyn AuthBackend>, page: ObservedPageStorage, session_key: impl Into<String>) -> Self {
        Self {
            auth,
            page,
            session_key: session_key.into(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> RuntimeResult<()> {
        let session = self.auth.sign_in_with_password(email, password).await?;
        let raw = encode_page_session(&session.tokens).map_err(BridgeError::from)?;
        self.page.set_item(&self.session_key, &raw);
        debug!(user_id = %session.user.id, "web app signed in");
        Ok(())
    }

    pub async fn sign_out(&self) {
        if let Err(e) = self.auth.sign_out_local().await {
            warn!(error = %e, "web app sign-out revoke failed");
        }
        self.page.remove_item(&self.session_key);
    }

    /// The session the page currently holds.
    pub fn session(&self) -> Token {
        parse_page_session(self.page.get_item(&self.session_key).as_deref())
    }
}
