//! Rows of the chat tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One conversation, `chat_sessions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One message, `chat_messages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `chat_sessions`.
#[derive(Debug, Serialize)]
pub(crate) struct SessionInsert<'a> {
    pub id: String,
    pub user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
}

/// Insert payload for `chat_messages`.
#[derive(Debug, Serialize)]
pub(crate) struct MessageInsert<'a> {
    pub session_id: &'a str,
    pub role: ChatRole,
    pub content: &'a str,
}

/// Body of a `chat` edge function call.
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
}
