//! Chat persistence for the extension's side panel.
//!
//! Thin Supabase REST client over the `chat_sessions` / `chat_messages`
//! tables plus the streaming `chat` edge function. Every call takes the
//! caller's current access token; the session sync machinery decides which
//! token that is.

mod client;
mod error;
mod types;

pub use client::ChatClient;
pub use error::{ChatError, ChatResult};
pub use types::{ChatMessage, ChatRole, ChatSession};
