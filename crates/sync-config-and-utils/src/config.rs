//! `~/.tabsync/config.json` plus environment overrides.
//!
//! Supabase coordinates are baked in at build time; a config file cannot
//! point the extension at another project.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://random.supabase.co",
};

pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "random-key",
};

pub const DEFAULT_WEB_APP_PATTERN: &str = match option_env!("TABSYNC_WEB_APP_PATTERN") {
    Some(pattern) => pattern,
    None => "http://localhost:5173/*",
};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Fallback page storage key when the project ref cannot be derived.
pub const DEFAULT_PAGE_SESSION_KEY: &str = "sb-auth-token";

/// How often the page bridge polls the page's storage slot.
pub const DEFAULT_PAGE_POLL_INTERVAL_MS: u64 = 2_000;

/// Delay between page load and the bridge's first forward.
pub const DEFAULT_INITIAL_SYNC_DELAY_MS: u64 = 800;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Match patterns of tabs that host the web app.
    #[serde(default = "default_web_app_patterns")]
    pub web_app_patterns: Vec<String>,
    /// Key under which the web app keeps its session in page storage.
    #[serde(default)]
    pub page_session_key: Option<String>,
    /// Polling interval of the page storage fallback observer.
    #[serde(default = "default_page_poll_interval_ms")]
    pub page_poll_interval_ms: u64,
    /// Delay before the first forward after page load.
    #[serde(default = "default_initial_sync_delay_ms")]
    pub initial_sync_delay_ms: u64,
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

fn default_web_app_patterns() -> Vec<String> {
    vec![DEFAULT_WEB_APP_PATTERN.to_string()]
}

fn default_page_poll_interval_ms() -> u64 {
    DEFAULT_PAGE_POLL_INTERVAL_MS
}

fn default_initial_sync_delay_ms() -> u64 {
    DEFAULT_INITIAL_SYNC_DELAY_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            supabase_url: default_supabase_url(),
            supabase_publishable_key: default_supabase_publishable_key(),
            web_app_patterns: default_web_app_patterns(),
            page_session_key: None,
            page_poll_interval_ms: DEFAULT_PAGE_POLL_INTERVAL_MS,
            initial_sync_delay_ms: DEFAULT_INITIAL_SYNC_DELAY_MS,
        }
    }
}

impl Config {
    /// File (if any), then build-time Supabase coordinates, then env, then
    /// validation.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let file = paths.config_file();
        let mut config = if file.exists() {
            Self::load_from_file(&file)?
        } else {
            Self::default()
        };

        config.supabase_url = default_supabase_url();
        config.supabase_publishable_key = default_supabase_publishable_key();
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// `TABSYNC_LOG_LEVEL` and comma-separated `TABSYNC_WEB_APP_PATTERNS`.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("TABSYNC_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(raw) = std::env::var("TABSYNC_WEB_APP_PATTERNS") {
            let patterns: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            if !patterns.is_empty() {
                self.web_app_patterns = patterns;
            }
        }
    }

    /// Reject configurations the contexts cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.web_app_patterns.is_empty() {
            return Err(CoreError::Config(
                "at least one web_app_patterns entry is required".to_string(),
            ));
        }
        if self.page_poll_interval_ms == 0 {
            return Err(CoreError::Config(
                "page_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        self.supabase_url()?;
        Ok(())
    }

    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }

    /// Project ref, e.g. "abc123" from "https://abc123.supabase.co".
    pub fn project_ref(&self) -> Option<String> {
        let url = self.supabase_url().ok()?;
        let host = url.host_str()?;
        let first = host.split('.').next()?;
        if first.is_empty() {
            None
        } else {
            Some(first.to_string())
        }
    }

    /// Page storage key the web app's auth client writes its session to.
    pub fn page_session_key(&self) -> String {
        if let Some(key) = &self.page_session_key {
            return key.clone();
        }
        match self.project_ref() {
            Some(project_ref) => format!("sb-{}-auth-token", project_ref),
            None => DEFAULT_PAGE_SESSION_KEY.to_string(),
        }
    }
}
