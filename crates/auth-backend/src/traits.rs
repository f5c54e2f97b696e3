//! The auth client contract every context programs against.

use crate::{AuthEvent, AuthResult, BackendSession};
use async_trait::async_trait;
use sync_protocol_types::TokenPair;
use tokio::sync::broadcast;

/// Per-context auth client.
///
/// Each context owns its own client and therefore its own in-memory session.
/// State changes are announced on [`subscribe`](AuthBackend::subscribe),
/// including changes caused by [`set_session`](AuthBackend::set_session).
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Password grant. Emits `SIGNED_IN` on success.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<BackendSession>;

    /// Adopt an externally obtained token pair. Emits `SIGNED_IN`, or
    /// `TOKEN_REFRESHED` if the pair had to be refreshed first.
    async fn set_session(&self, tokens: &TokenPair) -> AuthResult<BackendSession>;

    /// Current in-memory session.
    async fn get_session(&self) -> Option<BackendSession>;

    /// Local-scope sign-out. The local session is always dropped and
    /// `SIGNED_OUT` emitted; an error only reports a failed server revoke.
    async fn sign_out_local(&self) -> AuthResult<()>;

    /// Subscribe to auth state changes from this point on.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
