//! tabsync - run the extension's session sync contexts from the command line.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sync_config_and_utils::{init_logging, Config, Paths};

/// tabsync CLI - sign in once, stay signed in everywhere.
#[derive(Parser)]
#[command(name = "tabsync")]
#[command(about = "Session sync between the web app and the extension")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, store, logs). Defaults to ~/.tabsync
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the in-process extension against an in-memory backend and print
    /// how the session converges
    Demo,

    /// Sign in with email and password and store the session for every context
    Login {
        /// Account email (prompted when missing)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Sign out and clear the stored session
    Logout,

    /// Show the stored session and whether the backend accepts it
    Status,

    /// Work with chat sessions of the signed-in user
    Chats {
        #[command(subcommand)]
        command: ChatCommands,
    },
}

#[derive(Subcommand)]
enum ChatCommands {
    /// List chat sessions
    List,
    /// List messages in a chat session
    Messages {
        /// Chat session ID
        id: String,
    },
    /// Send a message and stream the reply
    Send {
        /// Chat session ID
        id: String,
        /// Message text
        message: String,
    },
    /// Delete a chat session
    Delete {
        /// Chat session ID
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;
    init_logging(&paths, cli.log_level.as_deref().unwrap_or(&config.log_level));

    let format = cli.format;
    match cli.command {
        Commands::Demo => commands::demo(&config, &format).await,
        Commands::Login { email } => commands::login(&config, &paths, email, &format).await,
        Commands::Logout => commands::logout(&config, &paths, &format).await,
        Commands::Status => commands::status(&config, &paths, &format).await,
        Commands::Chats { command } => match command {
            ChatCommands::List => commands::chats_list(&config, &paths, &format).await,
            ChatCommands::Messages { id } => {
                commands::chats_messages(&config, &paths, &id, &format).await
            }
            ChatCommands::Send { id, message } => {
                commands::chats_send(&config, &paths, &id, &message).await
            }
            ChatCommands::Delete { id } => {
                commands::chats_delete(&config, &paths, &id, &format).await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tabsync", "status", "--format", "json", "--base-dir", "/tmp/x"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert!(matches!(cli.format, output::OutputFormat::Json));
        assert_eq!(cli.base_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn chats_send_takes_id_and_message() {
        let cli = Cli::try_parse_from(["tabsync", "chats", "send", "abc", "hello there"]).unwrap();
        match cli.command {
            Commands::Chats {
                command: ChatCommands::Send { id, message },
            } => {
                assert_eq!(id, "abc");
                assert_eq!(message, "hello there");
            }
            _ => panic!("expected chats send"),
        }
    }
}
