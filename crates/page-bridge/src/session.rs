//! Reading and writing the web app's session slot.
//!
//! The web app's auth library keeps its session as JSON under one
//! localStorage key. Two shapes are seen in the wild:
//!
//! ```text
//! { "access_token": "...", "refresh_token": "...", "expires_at": ..., "user": {...} }
//! { "currentSession": { "access_token": "...", "refresh_token": "..." }, "expiresAt": ... }
//! ```
//!
//! Anything else (unparsable, missing tokens, `null`) reads as "no session".

use serde_json::{json, Value};
use sync_protocol_types::{Token, TokenPair};

/// Parse a raw slot value into a token snapshot.
pub fn parse_page_session(raw: Option<&str>) -> Token {
    let value: Value = serde_json::from_str(raw?).ok()?;
    let session = match value.get("currentSession") {
        Some(inner) if inner.is_object() => inner,
        _ => &value,
    };

    let access = session.get("access_token")?.as_str()?;
    let refresh = session.get("refresh_token")?.as_str()?;
    let pair = TokenPair::new(access, refresh);
    pair.is_complete().then_some(pair)
}

/// Slot value for a token pair, in the flat shape.
pub fn encode_page_session(pair: &TokenPair) -> Result<String, serde_json::Error> {
    serde_json::to_string(&json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
        "token_type": "bearer",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_shape() {
        let raw = r#"{"access_token":"abc","refresh_token":"r1","expires_at":1700000000,"user":{"id":"u"}}"#;
        assert_eq!(parse_page_session(Some(raw)), Some(TokenPair::new("abc", "r1")));
    }

    #[test]
    fn test_nested_shape() {
        let raw = r#"{"currentSession":{"access_token":"abc","refresh_token":"r1"},"expiresAt":1}"#;
        assert_eq!(parse_page_session(Some(raw)), Some(TokenPair::new("abc", "r1")));
    }

    #[test]
    fn test_unusable_values_read_as_cleared() {
        assert_eq!(parse_page_session(None), None);
        assert_eq!(parse_page_session(Some("not json")), None);
        assert_eq!(parse_page_session(Some("null")), None);
        assert_eq!(parse_page_session(Some(r#"{"access_token":"abc"}"#)), None);
        assert_eq!(
            parse_page_session(Some(r#"{"access_token":"","refresh_token":"r1"}"#)),
            None
        );
        assert_eq!(parse_page_session(Some(r#"{"currentSession":null}"#)), None);
    }

    #[test]
    fn test_encoded_value_parses_back() {
        let pair = TokenPair::new("abc", "r1");
        let raw = encode_page_session(&pair).unwrap();
        assert_eq!(parse_page_session(Some(&raw)), Some(pair));
    }
}
