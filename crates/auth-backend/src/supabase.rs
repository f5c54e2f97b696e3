//! Supabase Auth (GoTrue) REST client.

use crate::auth_fsm::RefreshConfig;
use crate::{AuthBackend, AuthError, AuthEvent, AuthResult, BackendSession, BackendUser};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sync_protocol_types::TokenPair;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the auto-refresh task checks the session's expiry.
pub const AUTO_REFRESH_TICK_SECS: u64 = 30;
/// Refresh once the access token expires within this window.
pub const AUTO_REFRESH_MARGIN_SECS: i64 = 90;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token endpoint response (password and refresh grants).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

/// `/auth/v1/user` response.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserResponse> for BackendUser {
    fn from(user: UserResponse) -> Self {
        BackendUser {
            id: user.id,
            email: user.email,
        }
    }
}

impl TokenResponse {
    fn into_session(self) -> BackendSession {
        let expires_at = expiry_from(self.expires_at, self.expires_in);
        BackendSession {
            tokens: TokenPair::new(self.access_token, self.refresh_token),
            expires_at,
            user: self.user.into(),
        }
    }
}

fn expiry_from(expires_at: Option<i64>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    match (expires_at, expires_in) {
        (Some(at), _) => Utc.timestamp_opt(at, 0).single(),
        (None, Some(secs)) => Some(Utc::now() + Duration::seconds(secs)),
        (None, None) => None,
    }
}

/// Pull the human-readable message out of a GoTrue error body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error_description: Option<String>,
        msg: Option<String>,
        message: Option<String>,
        error: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|e| e.error_description.or(e.msg).or(e.message).or(e.error))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Supabase Auth client holding one context's session.
pub struct SupabaseAuthClient {
    http_client: reqwest::Client,
    api_url: String,
    publishable_key: String,
    session: RwLock<Option<BackendSession>>,
    events: broadcast::Sender<AuthEvent>,
    refresh_config: RefreshConfig,
}

impl SupabaseAuthClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project URL (e.g., `https://xyz.supabase.co`)
    /// * `publishable_key` - The project's publishable (anon) key
    pub fn new(api_url: impl Into<String>, publishable_key: impl Into<String>) -> Self {
        Self::with_refresh_config(api_url, publishable_key, RefreshConfig::default())
    }

    /// Create a client with custom refresh retry behavior.
    pub fn with_refresh_config(
        api_url: impl Into<String>,
        publishable_key: impl Into<String>,
        refresh_config: RefreshConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            publishable_key: publishable_key.into(),
            session: RwLock::new(None),
            events,
            refresh_config,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, path)
    }

    fn emit(&self, event: AuthEvent) {
        debug!(event = event.name(), "auth event");
        let _ = self.events.send(event);
    }

    fn store(&self, session: Option<BackendSession>) {
        *self.session.write() = session;
    }

    async fn password_grant(&self, email: &str, password: &str) -> AuthResult<BackendSession> {
        let url = self.auth_url("token?grant_type=password");
        debug!(url = %url, "Attempting email/password login");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.publishable_key)
            .json(&PasswordRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(&response.text().await.unwrap_or_default());
            warn!(status = %status, "Login failed");
            if status.is_client_error() {
                return Err(AuthError::InvalidCredentials(message));
            }
            return Err(AuthError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let data: TokenResponse = response.json().await?;
        Ok(data.into_session())
    }

    /// Verify an access token with `/auth/v1/user`.
    async fn fetch_user(&self, access_token: &str) -> AuthResult<BackendUser> {
        let url = self.auth_url("user");
        debug!(url = %url, "Verifying session with Supabase");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(&response.text().await.unwrap_or_default());
            if status.is_client_error() {
                return Err(AuthError::SessionInvalid(message));
            }
            return Err(AuthError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let user: UserResponse = response.json().await?;
        Ok(user.into())
    }

    /// Single attempt to refresh a session.
    async fn try_refresh(&self, refresh_token: &str) -> AuthResult<BackendSession> {
        let url = self.auth_url("token?grant_type=refresh_token");
        debug!(url = %url, "Refreshing token");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.publishable_key)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(&response.text().await.unwrap_or_default());
            warn!(status = %status, "Token refresh failed");
            if status.is_client_error() {
                return Err(AuthError::TokenRefresh(message));
            }
            return Err(AuthError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let data: TokenResponse = response.json().await?;
        Ok(data.into_session())
    }

    /// Refresh with exponential backoff on transient errors.
    async fn refresh_with_backoff(&self, refresh_token: &str) -> AuthResult<BackendSession> {
        let mut last_error = None;

        for attempt in 0..self.refresh_config.max_retries {
            match self.try_refresh(refresh_token).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_transient() => {
                    last_error = Some(e);
                    if attempt + 1 < self.refresh_config.max_retries {
                        let delay = self.refresh_config.delay_for_attempt(attempt);
                        debug!(
                            attempt = attempt + 1,
                            max_retries = self.refresh_config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Refresh failed with non-transient error");
                    return Err(e);
                }
            }
        }

        warn!(
            attempts = self.refresh_config.max_retries,
            "Refresh failed after all attempts"
        );
        Err(last_error.unwrap_or(AuthError::RefreshExhausted(self.refresh_config.max_retries)))
    }

    /// Refresh the current session. Emits `TOKEN_REFRESHED`, or drops the
    /// session and emits `SIGNED_OUT` when the refresh token is rejected.
    pub async fn refresh_session(&self) -> AuthResult<BackendSession> {
        let current = self.session.read().clone().ok_or(AuthError::NotLoggedIn)?;
        match self.refresh_with_backoff(&current.tokens.refresh_token).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "Token refreshed");
                self.store(Some(session.clone()));
                self.emit(AuthEvent::TokenRefreshed(session.clone()));
                Ok(session)
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                self.store(None);
                self.emit(AuthEvent::SignedOut);
                Err(e)
            }
        }
    }

    /// Keep the session fresh in the background.
    pub fn spawn_auto_refresh(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(std::time::Duration::from_secs(AUTO_REFRESH_TICK_SECS));
            loop {
                tick.tick().await;
                let due = self
                    .session
                    .read()
                    .as_ref()
                    .is_some_and(|s| s.expires_within(Duration::seconds(AUTO_REFRESH_MARGIN_SECS)));
                if due {
                    if let Err(e) = self.refresh_session().await {
                        warn!(error = %e, "Auto refresh failed");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl AuthBackend for SupabaseAuthClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<BackendSession> {
        let session = self.password_grant(email, password).await?;
        info!(user_id = %session.user.id, "Login successful");
        self.store(Some(session.clone()));
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn set_session(&self, tokens: &TokenPair) -> AuthResult<BackendSession> {
        match self.fetch_user(&tokens.access_token).await {
            Ok(user) => {
                let session = BackendSession {
                    tokens: tokens.clone(),
                    expires_at: None,
                    user,
                };
                self.store(Some(session.clone()));
                self.emit(AuthEvent::SignedIn(session.clone()));
                Ok(session)
            }
            Err(AuthError::SessionInvalid(reason)) => {
                debug!(reason = %reason, "Access token rejected, attempting refresh");
                let session = self
                    .refresh_with_backoff(&tokens.refresh_token)
                    .await
                    .map_err(|e| {
                        if e.is_transient() {
                            e
                        } else {
                            AuthError::SessionInvalid(reason)
                        }
                    })?;
                self.store(Some(session.clone()));
                self.emit(AuthEvent::TokenRefreshed(session.clone()));
                Ok(session)
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
            Some(session) => {
                let url = self.auth_url("logout?scope=local");
                let result = self
                    .http_client
                    .post(&url)
                    .header("apikey", &self.publishable_key)
                    .header("Authorization", format!("Bearer {}", session.access_token()))
                    .send()
                    .await;
                match result {
                    Ok(r) if r.status().is_success() => Ok(()),
                    Ok(r) => {
                        let status = r.status();
                        let message = error_message(&r.text().await.unwrap_or_default());
                        Err(AuthError::RevokeFailed(format!("HTTP {}: {}", status, message)))
                    }
                    Err(e) => Err(AuthError::RevokeFailed(e.to_string())),
                }
            }
            None => Ok(()),
        };

        self.store(None);
        self.emit(AuthEvent::SignedOut);
        if let Err(e) = &revoke {
            warn!(error = %e, "Server-side revoke failed; local session cleared");
        }
        revoke
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for SupabaseAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAuthClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses, one per connection, and record request heads.
    async fn serve(responses: Vec<(u16, String)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut heads = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    if n == 0 {
                        break buf.len();
                    }
                };
                let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
                let content_length = head
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                while buf.len() < head_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                heads.push(head);
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            heads
        });
        (url, handle)
    }

    fn token_body(access: &str, refresh: &str) -> String {
        serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 3600,
            "user": { "id": "u1", "email": "a@b.c" }
        })
        .to_string()
    }

    #[test]
    fn test_auth_url_trims_trailing_slash() {
        let client = SupabaseAuthClient::new("https://test.supabase.co/", "key");
        assert_eq!(
            client.auth_url("user"),
            "https://test.supabase.co/auth/v1/user"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(r#"{"msg":"Email not confirmed"}"#), "Email not confirmed");
        assert_eq!(error_message("plain text "), "plain text");
    }

    #[test]
    fn test_expiry_prefers_absolute_timestamp() {
        let at = expiry_from(Some(1_700_000_000), Some(10)).unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
        assert!(expiry_from(None, None).is_none());
    }

    #[tokio::test]
    async fn test_sign_in_success_emits_event() {
        let (url, server) = serve(vec![(200, token_body("abc", "r1"))]).await;
        let client = SupabaseAuthClient::new(url, "key");
        let mut events = client.subscribe();

        let session = client.sign_in_with_password("a@b.c", "pw").await.unwrap();

        assert_eq!(session.tokens, TokenPair::new("abc", "r1"));
        assert_eq!(session.user.email.as_deref(), Some("a@b.c"));
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn(_)));

        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("POST /auth/v1/token?grant_type=password"));
        assert!(heads[0].to_ascii_lowercase().contains("apikey: key"));
    }

    #[tokio::test]
    async fn test_sign_in_rejected_surfaces_backend_message() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        let (url, _server) = serve(vec![(400, body.to_string())]).await;
        let client = SupabaseAuthClient::new(url, "key");

        let err = client.sign_in_with_password("a@b.c", "bad").await.unwrap_err();

        assert!(err.is_user_visible());
        assert_eq!(err.user_message(), "Invalid login credentials");
        assert!(client.get_session().await.is_none());
    }

    #[tokio::test]
    async fn test_set_session_refreshes_rejected_token() {
        let (url, server) = serve(vec![
            (401, r#"{"msg":"invalid JWT"}"#.to_string()),
            (200, token_body("fresh", "r2")),
        ])
        .await;
        let client = SupabaseAuthClient::new(url, "key");

        let session = client
            .set_session(&TokenPair::new("stale", "r1"))
            .await
            .unwrap();

        assert_eq!(session.tokens, TokenPair::new("fresh", "r2"));
        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("GET /auth/v1/user"));
        assert!(heads[1].starts_with("POST /auth/v1/token?grant_type=refresh_token"));
    }

    #[tokio::test]
    async fn test_set_session_with_dead_refresh_token_is_stale() {
        let (url, _server) = serve(vec![
            (401, r#"{"msg":"invalid JWT"}"#.to_string()),
            (400, r#"{"error_description":"Invalid Refresh Token"}"#.to_string()),
        ])
        .await;
        let client = SupabaseAuthClient::new(url, "key");

        let err = client
            .set_session(&TokenPair::new("stale", "dead"))
            .await
            .unwrap_err();

        assert!(err.is_stale_token());
        assert!(!err.is_user_visible());
    }

    #[tokio::test]
    async fn test_sign_out_revoke_failure_tolerated() {
        let (url, _server) = serve(vec![
            (200, token_body("abc", "r1")),
            (500, r#"{"msg":"boom"}"#.to_string()),
        ])
        .await;
        let client = SupabaseAuthClient::new(url, "key");
        client.sign_in_with_password("a@b.c", "pw").await.unwrap();
        let mut events = client.subscribe();

        let result = client.sign_out_local().await;

        assert!(matches!(result, Err(AuthError::RevokeFailed(_))));
        assert!(client.get_session().await.is_none());
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transient() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = SupabaseAuthClient::new(url, "key");
        let err = client.sign_in_with_password("a@b.c", "pw").await.unwrap_err();
        assert!(err.is_transient());
    }
}
