//! Configuration, paths and logging setup for the session-sync workspace.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_INITIAL_SYNC_DELAY_MS, DEFAULT_LOG_LEVEL, DEFAULT_PAGE_POLL_INTERVAL_MS,
    DEFAULT_PAGE_SESSION_KEY, DEFAULT_SUPABASE_PUBLISHABLE_KEY, DEFAULT_SUPABASE_URL,
    DEFAULT_WEB_APP_PATTERN,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
