//! Chat session commands.

use super::PopupSession;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use chat_client::ChatClient;
use std::io::{self, Write};
use sync_config_and_utils::{Config, Paths};

/// A chat client plus the signed-in user's access token.
async fn with_token(config: &Config, paths: &Paths) -> Result<(ChatClient, String)> {
    let client = ChatClient::from_config(config)?;
    let session = PopupSession::open(config, paths).await?;
    let token = session.access_token().await;
    session.close().await;
    Ok((client, token?))
}

/// List chat sessions.
pub async fn chats_list(config: &Config, paths: &Paths, format: &OutputFormat) -> Result<()> {
    let (client, token) = with_token(config, paths).await?;
    let sessions = client.list_sessions(&token).await?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No chat sessions");
                return Ok(());
            }
            output::print_heading("Chat sessions");
            for session in &sessions {
                let updated = session.updated_at.unwrap_or(session.created_at);
                output::print_row(
                    &session.id,
                    &format!(
                        "{} ({})",
                        session.title.as_deref().unwrap_or("Untitled"),
                        updated.format("%Y-%m-%d %H:%M")
                    ),
                );
            }
        }
        OutputFormat::Json => output::print_json(&sessions)?,
    }
    Ok(())
}

/// List messages in a chat session.
pub async fn chats_messages(
    config: &Config,
    paths: &Paths,
    id: &str,
    format: &OutputFormat,
) -> Result<()> {
    let (client, token) = with_token(config, paths).await?;
    let messages = client.list_messages(id, &token).await?;

    match format {
        OutputFormat::Text => {
            for message in &messages {
                println!("[{:?}] {}", message.role, message.content);
            }
        }
        OutputFormat::Json => output::print_json(&messages)?,
    }
    Ok(())
}

/// Send a message and stream the reply to stdout.
pub async fn chats_send(config: &Config, paths: &Paths, id: &str, message: &str) -> Result<()> {
    let (client, token) = with_token(config, paths).await?;
    let mut stdout = io::stdout();
    client
        .stream_reply(id, message, &token, |chunk| {
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        })
        .await?;
    println!();
    Ok(())
}

/// Delete a chat session.
pub async fn chats_delete(
    config: &Config,
    paths: &Paths,
    id: &str,
    format: &OutputFormat,
) -> Result<()> {
    let (client, token) = with_token(config, paths).await?;
    client.delete_session(id, &token).await?;
    output::print_success(&format!("Deleted chat session {}", id), format);
    Ok(())
}
