//! Deterministic in-process backend.
//!
//! [`InMemoryAuthServer`] plays the hosted auth service (accounts, issued
//! tokens, revocation); each context gets its own [`InMemoryAuthBackend`]
//! client from it, with an independent in-memory session and event stream.

use crate::{AuthBackend, AuthError, AuthEvent, AuthResult, BackendSession, BackendUser};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use sync_protocol_types::TokenPair;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifetime of issued access tokens.
const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Account {
    password: String,
    user: BackendUser,
}

struct Grant {
    refresh_token: String,
    user: BackendUser,
}

#[derive(Default)]
struct ServerState {
    accounts: HashMap<String, Account>,
    /// Live access tokens.
    grants: HashMap<String, Grant>,
    /// Live refresh tokens → access token they were issued with.
    refresh_index: HashMap<String, String>,
}

/// Shared auth service double.
#[derive(Clone, Default)]
pub struct InMemoryAuthServer {
    state: Arc<Mutex<ServerState>>,
    counter: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
    revoke_fails: Arc<AtomicBool>,
}

impl InMemoryAuthServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account.
    pub fn register(&self, email: &str, password: &str) -> BackendUser {
        let user = BackendUser {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
        };
        self.state.lock().accounts.insert(
            email.to_ascii_lowercase(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.register(email, password);
        self
    }

    /// New client with its own session.
    pub fn client(&self) -> InMemoryAuthBackend {
        InMemoryAuthBackend::new(self.clone())
    }

    /// Simulate the service being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make server-side revocation fail during sign-out.
    pub fn set_revoke_fails(&self, fails: bool) {
        self.revoke_fails.store(fails, Ordering::SeqCst);
    }

    /// Invalidate a token pair, as if it expired or was revoked elsewhere.
    pub fn revoke(&self, access_token: &str) {
        let mut state = self.state.lock();
        if let Some(grant) = state.grants.remove(access_token) {
            state.refresh_index.remove(&grant.refresh_token);
        }
    }

    /// Expire an access token while its refresh token stays redeemable, as
    /// when a stored session outlives the access token's lifetime.
    pub fn expire_access_token(&self, access_token: &str) {
        let mut state = self.state.lock();
        if let Some(grant) = state.grants.remove(access_token) {
            let parked = format!("expired:{}", access_token);
            state
                .refresh_index
                .insert(grant.refresh_token.clone(), parked.clone());
            state.grants.insert(parked, grant);
        }
    }

    /// Whether an access token is currently accepted.
    pub fn is_valid(&self, access_token: &str) -> bool {
        self.state.lock().grants.contains_key(access_token)
    }

    /// Sign in out-of-band (e.g. the web app's own client) and return the
    /// session without touching any extension client.
    pub fn issue_session(&self, email: &str, password: &str) -> AuthResult<BackendSession> {
        self.password_grant(email, password)
    }

    fn check_online(&self) -> AuthResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuthError::NetworkUnavailable);
        }
        Ok(())
    }

    fn mint(&self, state: &mut ServerState, user: BackendUser) -> BackendSession {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let tokens = TokenPair::new(format!("at-{}", n), format!("rt-{}", n));
        state.grants.insert(
            tokens.access_token.clone(),
            Grant {
                refresh_token: tokens.refresh_token.clone(),
                user: user.clone(),
            },
        );
        state
            .refresh_index
            .insert(tokens.refresh_token.clone(), tokens.access_token.clone());
        BackendSession {
            tokens,
            expires_at: Some(Utc::now() + Duration::seconds(ACCESS_TOKEN_TTL_SECS)),
            user,
        }
    }

    fn password_grant(&self, email: &str, password: &str) -> AuthResult<BackendSession> {
        self.check_online()?;
        let mut state = self.state.lock();
        let user = match state.accounts.get(&email.to_ascii_lowercase()) {
            Some(account) if account.password == password => account.user.clone(),
            _ => {
                return Err(AuthError::InvalidCredentials(
                    "Invalid login credentials".to_string(),
                ))
            }
        };
        Ok(self.mint(&mut state, user))
    }

    /// Resolve an access token to its user.
    fn verify(&self, tokens: &TokenPair) -> AuthResult<BackendUser> {
        self.check_online()?;
        let state = self.state.lock();
        match state.grants.get(&tokens.access_token) {
            Some(grant) if grant.refresh_token == tokens.refresh_token => Ok(grant.user.clone()),
            Some(_) => Err(AuthError::SessionInvalid("refresh token mismatch".to_string())),
            None => Err(AuthError::SessionInvalid("invalid JWT".to_string())),
        }
    }

    /// Rotate a refresh token. The old pair stops working.
    fn refresh_grant(&self, refresh_token: &str) -> AuthResult<BackendSession> {
        self.check_online()?;
        let mut state = self.state.lock();
        let access = state
            .refresh_index
            .remove(refresh_token)
            .ok_or_else(|| AuthError::TokenRefresh("Invalid Refresh Token".to_string()))?;
        let grant = state
            .grants
            .remove(&access)
            .ok_or_else(|| AuthError::TokenRefresh("Invalid Refresh Token".to_string()))?;
        Ok(self.mint(&mut state, grant.user))
    }

    fn logout(&self, access_token: &str) -> AuthResult<()> {
        self.check_online()?;
        if self.revoke_fails.load(Ordering::SeqCst) {
            return Err(AuthError::RevokeFailed("revocation endpoint failed".to_string()));
        }
        self.revoke(access_token);
        Ok(())
    }
}

/// One context's client of an [`InMemoryAuthServer`].
pub struct InMemoryAuthBackend {
    server: InMemoryAuthServer,
    session: RwLock<Option<BackendSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl InMemoryAuthBackend {
    pub fn new(server: InMemoryAuthServer) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            server,
            session: RwLock::new(None),
            events,
        }
    }

    pub fn server(&self) -> &InMemoryAuthServer {
        &self.server
    }

    /// Rotate the current session's tokens, as the auto-refresh timer would.
    /// Emits `TOKEN_REFRESHED`.
    pub async fn refresh_session(&self) -> AuthResult<BackendSession> {
        let current = self.session.read().clone().ok_or(AuthError::NotLoggedIn)?;
        let refreshed = self.server.refresh_grant(&current.tokens.refresh_token)?;
        self.store(Some(refreshed.clone()));
        self.emit(AuthEvent::TokenRefreshed(refreshed.clone()));
        Ok(refreshed)
    }

    fn store(&self, session: Option<BackendSession>) {
        *self.session.write() = session;
    }

    fn emit(&self, event: AuthEvent) {
        debug!(event = event.name(), "auth event");
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AuthBackend for InMemoryAuthBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<BackendSession> {
        let session = self.server.password_grant(email, password)?;
        info!(user_id = %session.user.id, "signed in with password");
        self.store(Some(session.clone()));
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn set_session(&self, tokens: &TokenPair) -> AuthResult<BackendSession> {
        match self.server.verify(tokens) {
            Ok(user) => {
                let session = BackendSession {
                    tokens: tokens.clone(),
                    expires_at: Some(Utc::now() + Duration::seconds(ACCESS_TOKEN_TTL_SECS)),
                    user,
                };
                self.store(Some(session.clone()));
                self.emit(AuthEvent::SignedIn(session.clone()));
                Ok(session)
            }
            Err(AuthError::SessionInvalid(reason)) => {
                // Expired access token: try the refresh token before giving up.
                debug!(reason = %reason, "access token rejected, attempting refresh");
                let refreshed = self
                    .server
                    .refresh_grant(&tokens.refresh_token)
                    .map_err(|_| AuthError::SessionInvalid(reason))?;
                self.store(Some(refreshed.clone()));
                self.emit(AuthEvent::TokenRefreshed(refreshed.clone()));
                Ok(refreshed)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_session(&self) -> Option<BackendSession> {
        self.session.read().clone()
    }

    async fn sign_out_local(&self) -> AuthResult<()> {
        let current = self.session.read().clone();
        let revoke = match &current {
            Some(session) => self.server.logout(session.access_token()),
            None => Ok(()),
        };
        self.store(None);
        self.emit(AuthEvent::SignedOut);
        if let Err(e) = &revoke {
            warn!(error = %e, "server-side revoke failed; local session cleared");
        }
        revoke
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> InMemoryAuthServer {
        InMemoryAuthServer::new().with_account("a@b.c", "pw")
    }

    #[tokio::test]
    async fn test_sign_in_emits_signed_in() {
        let client = server().client();
        let mut events = client.subscribe();

        let session = client.sign_in_with_password("a@b.c", "pw").await.unwrap();

        assert_eq!(session.user.email.as_deref(), Some("a@b.c"));
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn(session.clone()));
        assert_eq!(client.get_session().await, Some(session));
    }

    #[tokio::test]
    async fn test_wrong_password_is_credential_error() {
        let client = server().client();
        let err = client.sign_in_with_password("a@b.c", "nope").await.unwrap_err();
        assert!(err.is_user_visible());
        assert_eq!(err.user_message(), "Invalid login credentials");
        assert!(client.get_session().await.is_none());
    }

    #[tokio::test]
    async fn test_clients_have_independent_sessions() {
        let server = server();
        let web = server.issue_session("a@b.c", "pw").unwrap();
        let popup = server.client();

        assert!(popup.get_session().await.is_none());
        let adopted = popup.set_session(&web.tokens).await.unwrap();
        assert_eq!(adopted.tokens, web.tokens);
        assert_eq!(adopted.user, web.user);
    }

    #[tokio::test]
    async fn test_set_session_with_garbage_is_stale() {
        let client = server().client();
        let err = client
            .set_session(&TokenPair::new("garbage", "garbage"))
            .await
            .unwrap_err();
        assert!(err.is_stale_token());
        assert!(client.get_session().await.is_none());
    }

    #[tokio::test]
    async fn test_set_session_refreshes_expired_access_token() {
        let server = server();
        let web = server.issue_session("a@b.c", "pw").unwrap();
        server.expire_access_token(&web.tokens.access_token);
        assert!(!server.is_valid(&web.tokens.access_token));

        let client = server.client();
        let mut events = client.subscribe();
        let session = client.set_session(&web.tokens).await.unwrap();

        assert_ne!(session.tokens, web.tokens);
        assert!(server.is_valid(session.access_token()));
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::TokenRefreshed(_)));
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let server = server();
        let client = server.client();
        let first = client.sign_in_with_password("a@b.c", "pw").await.unwrap();

        let second = client.refresh_session().await.unwrap();

        assert_ne!(first.tokens, second.tokens);
        assert!(!server.is_valid(first.access_token()));
        assert!(server.is_valid(second.access_token()));
    }

    #[tokio::test]
    async fn test_sign_out_revoke_failure_still_clears_session() {
        let server = server();
        let client = server.client();
        client.sign_in_with_password("a@b.c", "pw").await.unwrap();
        let mut events = client.subscribe();
        server.set_revoke_fails(true);

        let result = client.sign_out_local().await;

        assert!(matches!(result, Err(AuthError::RevokeFailed(_))));
        assert!(client.get_session().await.is_none());
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn test_offline_is_transient() {
        let server = server();
        server.set_offline(true);
        let err = server.client().sign_in_with_password("a@b.c", "pw").await.unwrap_err();
        assert!(err.is_transient());
    }
}
