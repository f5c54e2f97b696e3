//! Credential snapshot carried between contexts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh credential pair for one authenticated session.
///
/// A pair is always replaced as a whole; contexts never patch a single field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Long-lived token used to mint a new access token.
    pub refresh_token: String,
}

impl TokenPair {
    /// Create a new credential pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Both halves present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    /// Short, log-safe fingerprint of the access token.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.access_token)
    }
}

// Token material must never end up in a log line.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &self.fingerprint())
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// A credential snapshot, or `None` for "signed out".
pub type Token = Option<TokenPair>;

/// Access token of a snapshot, if any.
pub fn access_token_of(token: &Token) -> Option<&str> {
    token.as_ref().map(|t| t.access_token.as_str())
}

/// Log-safe description of a snapshot.
pub fn describe(token: &Token) -> String {
    match token {
        Some(pair) => pair.fingerprint(),
        None => "none".to_string(),
    }
}

fn fingerprint(raw: &str) -> String {
    let tail: String = raw
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("len={},…{}", raw.len(), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_tokens() {
        let pair = TokenPair::new("eyJhbGciOiJIUzI1NiJ9.secret-part.sig1", "refresh-secret");
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains("secret-part"));
        assert!(!rendered.contains("refresh-secret"));
        assert!(rendered.contains("sig1"));
    }

    #[test]
    fn completeness_requires_both_halves() {
        assert!(TokenPair::new("a", "r").is_complete());
        assert!(!TokenPair::new("", "r").is_complete());
        assert!(!TokenPair::new("a", "").is_complete());
    }

    #[test]
    fn access_token_of_none_is_none() {
        assert_eq!(access_token_of(&None), None);
        assert_eq!(
            access_token_of(&Some(TokenPair::new("abc", "r1"))),
            Some("abc")
        );
    }

    #[test]
    fn describe_signed_out() {
        assert_eq!(describe(&None), "none");
    }
}
