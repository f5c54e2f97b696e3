//! Authentication commands.

use super::PopupSession;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use std::io::{self, Write};
use sync_config_and_utils::{Config, Paths};
use sync_protocol_types::access_token_of;

/// Login with email and password.
pub async fn login(
    config: &Config,
    paths: &Paths,
    email: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let session = PopupSession::open(config, paths).await?;
    let snapshot = session.settled().await?;

    if snapshot.ui.is_signed_in() {
        let email = snapshot.ui.email.as_deref().unwrap_or("unknown");
        output::print_success(&format!("Already logged in as {}", email), format);
        session.close().await;
        return Ok(());
    }

    let email = match email {
        Some(email) => email.trim().to_string(),
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut email = String::new();
            io::stdin().read_line(&mut email)?;
            email.trim().to_string()
        }
    };
    if email.is_empty() {
        session.close().await;
        anyhow::bail!("Email is required");
    }

    let password = match std::env::var("TABSYNC_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };
    if password.is_empty() {
        session.close().await;
        anyhow::bail!("Password is required");
    }

    let result = session.popup.handle.sign_in(&email, &password).await;
    let snapshot = session.popup.handle.snapshot().await?;
    session.close().await;

    match result {
        Ok(()) => {
            let email_display = snapshot.ui.email.as_deref().unwrap_or(&email);
            output::print_success(&format!("Logged in as {}", email_display), format);
            Ok(())
        }
        Err(e) => {
            let message = snapshot.ui.error.or_else(|| e.user_message()).unwrap_or_else(|| e.to_string());
            anyhow::bail!("Login failed: {}", message)
        }
    }
}

/// Logout and clear the stored session.
pub async fn logout(config: &Config, paths: &Paths, format: &OutputFormat) -> Result<()> {
    let session = PopupSession::open(config, paths).await?;
    let was_signed_in = session.settled().await?.ui.is_signed_in();

    // Publishes the cleared session even when the popup never adopted one,
    // so a token the backend rejected is gone from the store too.
    session.popup.handle.sign_out().await?;
    let remaining = session.runtime.canonical_token().await?;
    session.close().await;

    if remaining.is_some() {
        anyhow::bail!("Stored session could not be cleared");
    }
    if was_signed_in {
        output::print_success("Logged out successfully", format);
    } else {
        output::print_success("Not logged in", format);
    }
    Ok(())
}

/// Check authentication status.
pub async fn status(config: &Config, paths: &Paths, format: &OutputFormat) -> Result<()> {
    let session = PopupSession::open(config, paths).await?;
    let stored = session.runtime.canonical_token().await?;
    let snapshot = session.settled().await?;
    session.close().await;

    let logged_in = snapshot.ui.is_signed_in();
    match format {
        OutputFormat::Text => {
            output::print_heading("Session");
            output::print_row("Store", &paths.store_file().display().to_string());
            output::print_row("Log", &paths.log_file().display().to_string());
            output::print_row("Stored", if stored.is_some() { "yes" } else { "no" });
            if logged_in {
                output::print_row("Auth", "logged in");
                output::print_row("Email", snapshot.ui.email.as_deref().unwrap_or("unknown"));
            } else {
                output::print_row("Auth", "not logged in");
            }
            if let Some(error) = &snapshot.ui.error {
                output::print_row("Last error", error);
            }
        }
        OutputFormat::Json => {
            output::print_json(&serde_json::json!({
                "logged_in": logged_in,
                "state": snapshot.ui.auth_state,
                "email": snapshot.ui.email,
                "stored": stored.is_some(),
                "stored_matches_session":
                    access_token_of(&stored) == snapshot.session_access_token.as_deref(),
            }))?;
        }
    }
    Ok(())
}
