//! Backend session and auth event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use sync_protocol_types::{Token, TokenPair};

/// Identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// The auth client's in-memory session.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendSession {
    pub tokens: TokenPair,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: BackendUser,
}

impl BackendSession {
    pub fn access_token(&self) -> &str {
        &self.tokens.access_token
    }

    /// Serialized snapshot for the bus / store.
    pub fn token(&self) -> Token {
        Some(self.tokens.clone())
    }

    /// Expired, or expiring within `margin`.
    pub fn expires_within(&self, margin: chrono::Duration) -> bool {
        match self.expires_at {
            Some(at) => at - margin <= Utc::now(),
            None => false,
        }
    }
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("tokens", &self.tokens)
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user.id)
            .finish()
    }
}

/// Auth state change notification, as the client library emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(BackendSession),
    TokenRefreshed(BackendSession),
    SignedOut,
}

impl AuthEvent {
    /// Wire name of the event (`SIGNED_IN`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
            AuthEvent::SignedOut => "SIGNED_OUT",
        }
    }

    pub fn session(&self) -> Option<&BackendSession> {
        match self {
            AuthEvent::SignedIn(s) | AuthEvent::TokenRefreshed(s) => Some(s),
            AuthEvent::SignedOut => None,
        }
    }

    /// Token snapshot carried by the event.
    pub fn token(&self) -> Token {
        self.session().and_then(BackendSession::token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<DateTime<Utc>>) -> BackendSession {
        BackendSession {
            tokens: TokenPair::new("abc", "r1"),
            expires_at,
            user: BackendUser {
                id: "u1".into(),
                email: Some("a@b.c".into()),
            },
        }
    }

    #[test]
    fn test_event_token_and_name() {
        let event = AuthEvent::SignedIn(session(None));
        assert_eq!(event.name(), "SIGNED_IN");
        assert_eq!(event.token(), Some(TokenPair::new("abc", "r1")));
        assert_eq!(AuthEvent::SignedOut.token(), None);
        assert_eq!(AuthEvent::SignedOut.name(), "SIGNED_OUT");
    }

    #[test]
    fn test_expires_within() {
        let soon = session(Some(Utc::now() + chrono::Duration::seconds(30)));
        assert!(soon.expires_within(chrono::Duration::seconds(60)));
        assert!(!soon.expires_within(chrono::Duration::seconds(5)));
        assert!(!session(None).expires_within(chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let rendered = format!("{:?}", session(None));
        assert!(!rendered.contains("r1"));
    }
}
