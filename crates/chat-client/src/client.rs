//! Supabase REST API client for chat data.

use crate::error::{ChatError, ChatResult};
use crate::types::{
    ChatMessage, ChatRequest, ChatRole, ChatSession, MessageInsert, SessionInsert,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sync_config_and_utils::Config;
use tracing::{debug, error};

/// Supabase REST client for the chat tables.
#[derive(Clone)]
pub struct ChatClient {
    http_client: reqwest::Client,
    api_url: String,
    publishable_key: String,
}

impl ChatClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project URL (e.g., `https://xyz.supabase.co`)
    /// * `publishable_key` - The project's publishable (anon) key
    pub fn new(api_url: impl Into<String>, publishable_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            publishable_key: publishable_key.into(),
        }
    }

    /// Client for the project named in `config`.
    pub fn from_config(config: &Config) -> ChatResult<Self> {
        config
            .validate()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        Ok(Self::new(
            config.supabase_url.clone(),
            config.supabase_publishable_key.clone(),
        ))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{}", self.api_url, name)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// The user's chat sessions, most recently updated first.
    pub async fn list_sessions(&self, access_token: &str) -> ChatResult<Vec<ChatSession>> {
        let url = format!(
            "{}?select=*&order=updated_at.desc.nullslast,created_at.desc",
            self.rest_url("chat_sessions")
        );
        let sessions: Vec<ChatSession> = self.get_json(&url, access_token).await?;
        debug!(count = sessions.len(), "Listed chat sessions");
        Ok(sessions)
    }

    /// Create a chat session owned by `user_id`.
    pub async fn create_session(
        &self,
        user_id: &str,
        title: Option<&str>,
        access_token: &str,
    ) -> ChatResult<ChatSession> {
        let body = SessionInsert {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            title,
        };
        debug!(session_id = %body.id, "Creating chat session");
        self.insert_one(&self.rest_url("chat_sessions"), &body, access_token)
            .await
    }

    /// Delete a chat session. Its messages go with it (FK cascade).
    pub async fn delete_session(&self, session_id: &str, access_token: &str) -> ChatResult<()> {
        let url = format!("{}?id=eq.{}", self.rest_url("chat_sessions"), session_id);
        let access_token = require_token(access_token)?;

        debug!(session_id, "Deleting chat session");
        let response = self
            .http_client
            .delete(&url)
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Messages of one session, oldest first.
    pub async fn list_messages(
        &self,
        session_id: &str,
        access_token: &str,
    ) -> ChatResult<Vec<ChatMessage>> {
        let url = format!(
            "{}?session_id=eq.{}&select=*&order=created_at.asc",
            self.rest_url("chat_messages"),
            session_id
        );
        self.get_json(&url, access_token).await
    }

    /// Append a message to a session.
    pub async fn send_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
        access_token: &str,
    ) -> ChatResult<ChatMessage> {
        let body = MessageInsert {
            session_id,
            role,
            content,
        };
        debug!(session_id, ?role, "Saving chat message");
        self.insert_one(&self.rest_url("chat_messages"), &body, access_token)
            .await
    }

    // =========================================================================
    // Edge function
    // =========================================================================

    /// Call the `chat` edge function and stream the reply.
    ///
    /// `on_chunk` sees each decoded piece of text as it arrives; the full
    /// reply is returned at the end.
    pub async fn stream_reply<F>(
        &self,
        session_id: &str,
        message: &str,
        access_token: &str,
        mut on_chunk: F,
    ) -> ChatResult<String>
    where
        F: FnMut(&str),
    {
        let access_token = require_token(access_token)?;
        let mut response = self
            .http_client
            .post(self.function_url("chat"))
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&ChatRequest {
                session_id,
                message,
            })
            .send()
            .await?;
        response = check_response(response).await?;

        let mut reply = String::new();
        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            pending.extend_from_slice(&chunk);
            let text = take_utf8_prefix(&mut pending);
            if !text.is_empty() {
                on_chunk(&text);
                reply.push_str(&text);
            }
        }
        if !pending.is_empty() {
            let tail = String::from_utf8_lossy(&pending).into_owned();
            on_chunk(&tail);
            reply.push_str(&tail);
        }

        debug!(session_id, bytes = reply.len(), "Chat reply streamed");
        Ok(reply)
    }

    // =========================================================================
    // HTTP helpers
    // =========================================================================

    async fn get_json<T: DeserializeOwned>(&self, url: &str, access_token: &str) -> ChatResult<T> {
        let access_token = require_token(access_token)?;
        let response = self
            .http_client
            .get(url)
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        let body = check_response(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// POST one row and read it back.
    async fn insert_one<B, T>(&self, url: &str, body: &B, access_token: &str) -> ChatResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let access_token = require_token(access_token)?;
        let response = self
            .http_client
            .post(url)
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        let text = check_response(response).await?.text().await?;
        let mut rows: Vec<T> = serde_json::from_str(&text)?;
        if rows.is_empty() {
            return Err(ChatError::Supabase {
                status: 200,
                message: "insert returned no rows".to_string(),
            });
        }
        Ok(rows.swap_remove(0))
    }
}

fn require_token(access_token: &str) -> ChatResult<&str> {
    if access_token.is_empty() {
        return Err(ChatError::NotLoggedIn);
    }
    Ok(access_token)
}

/// Check HTTP response for errors, handing it back on success.
async fn check_response(response: reqwest::Response) -> ChatResult<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!(status, "Supabase request failed: {}", body);
        return Err(ChatError::Supabase {
            status,
            message: body,
        });
    }
    Ok(response)
}

/// Remove and return the longest valid UTF-8 prefix of `buf`, leaving a
/// split multi-byte sequence for the next chunk.
fn take_utf8_prefix(buf: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(buf) {
        Ok(_) => buf.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // Invalid bytes mid-stream: replace them rather than stall.
        Err(_) => buf.len(),
    };
    let rest = buf.split_off(valid);
    let text = String::from_utf8_lossy(buf).into_owned();
    *buf = rest;
    text
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses, one per connection, and record each
    /// request's head and body.
    async fn serve(
        responses: Vec<(u16, String)>,
    ) -> (String, tokio::task::JoinHandle<Vec<(String, String)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
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
                        l.to_ascii_lowercase()
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
                let request_body = String::from_utf8_lossy(&buf[head_end..]).to_string();
                requests.push((head, request_body));
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            requests
        });
        (url, handle)
    }

    fn session_row(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "user_id": "u1",
            "title": "Trip planning",
            "created_at": "2026-01-01T10:00:00Z",
            "updated_at": null
        })
    }

    #[test]
    fn test_urls() {
        let client = ChatClient::new("https://test.supabase.co/", "key");
        assert_eq!(
            client.rest_url("chat_sessions"),
            "https://test.supabase.co/rest/v1/chat_sessions"
        );
        assert_eq!(
            client.function_url("chat"),
            "https://test.supabase.co/functions/v1/chat"
        );
    }

    #[test]
    fn test_utf8_prefix_keeps_split_sequence() {
        let bytes = "héllo".as_bytes();
        let mut buf = bytes[..2].to_vec();
        assert_eq!(take_utf8_prefix(&mut buf), "h");
        assert_eq!(buf, vec![0xC3]);
        buf.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8_prefix(&mut buf), "éllo");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unauthorized_detection() {
        let err = ChatError::Supabase {
            status: 401,
            message: "JWT expired".to_string(),
        };
        assert!(err.is_unauthorized());
        assert!(!ChatError::NotLoggedIn.is_unauthorized());
    }

    #[tokio::test]
    async fn test_list_sessions_sends_credentials() {
        let body = serde_json::json!([session_row("s1"), session_row("s2")]).to_string();
        let (url, server) = serve(vec![(200, body)]).await;
        let client = ChatClient::new(url, "pk");

        let sessions = client.list_sessions("at-1").await.unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].title.as_deref(), Some("Trip planning"));
        let requests = server.await.unwrap();
        let head = requests[0].0.to_ascii_lowercase();
        assert!(head.starts_with("get /rest/v1/chat_sessions?select=*"));
        assert!(head.contains("apikey: pk"));
        assert!(head.contains("authorization: bearer at-1"));
    }

    #[tokio::test]
    async fn test_create_session_reads_back_row() {
        let body = serde_json::json!([session_row("s9")]).to_string();
        let (url, server) = serve(vec![(201, body)]).await;
        let client = ChatClient::new(url, "pk");

        let session = client
            .create_session("u1", Some("Trip planning"), "at-1")
            .await
            .unwrap();

        assert_eq!(session.id, "s9");
        let (head, sent) = &server.await.unwrap()[0];
        assert!(head.to_ascii_lowercase().contains("prefer: return=representation"));
        let sent: serde_json::Value = serde_json::from_str(sent).unwrap();
        assert_eq!(sent["user_id"], "u1");
        assert!(sent["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_send_message_and_list() {
        let row = serde_json::json!({
            "id": "m1",
            "session_id": "s1",
            "role": "user",
            "content": "hi",
            "created_at": "2026-01-01T10:00:00Z"
        });
        let (url, _server) = serve(vec![
            (201, serde_json::json!([row]).to_string()),
            (200, serde_json::json!([row]).to_string()),
        ])
        .await;
        let client = ChatClient::new(url, "pk");

        let saved = client
            .send_message("s1", ChatRole::User, "hi", "at-1")
            .await
            .unwrap();
        assert_eq!(saved.role, ChatRole::User);

        let listed = client.list_messages("s1", "at-1").await.unwrap();
        assert_eq!(listed, vec![saved]);
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let (url, _server) = serve(vec![(401, r#"{"message":"JWT expired"}"#.to_string())]).await;
        let client = ChatClient::new(url, "pk");

        let err = client.delete_session("s1", "at-old").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_missing_token_short_circuits() {
        let client = ChatClient::new("http://127.0.0.1:9", "pk");
        assert!(matches!(
            client.list_sessions("").await,
            Err(ChatError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_stream_reply_collects_chunks() {
        let (url, server) = serve(vec![(200, "Hello there".to_string())]).await;
        let client = ChatClient::new(url, "pk");
        let mut seen = String::new();

        let reply = client
            .stream_reply("s1", "hi", "at-1", |chunk| seen.push_str(chunk))
            .await
            .unwrap();

        assert_eq!(reply, "Hello there");
        assert_eq!(seen, reply);
        let head = server.await.unwrap()[0].0.to_ascii_lowercase();
        assert!(head.starts_with("post /functions/v1/chat"));
    }
}
