//! Structured logging shared by every tabsync context.
//!
//! A context calls [`init`] or [`init_with_config`] once and then logs through
//! the ordinary `tracing` macros. With the `dev` feature all contexts append
//! JSON lines to `~/.tabsync/logs/dev.jsonl`; without it a compact stderr
//! formatter is installed instead.
//!
//! Session tokens pass through most code paths here, so the JSON sink masks
//! credential-like keys and values before anything is written.

#[cfg(feature = "dev")]
mod dev;

mod json_layer;
mod redact;

use std::path::PathBuf;

pub use redact::{redact_fields, redact_value};

/// What the file sink keeps from each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservabilityMode {
    /// Every field, after redaction.
    #[default]
    DevVerbose,
    /// Numbers, booleans and a small allowlist of string fields.
    ProdMetadataOnly,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Tagged onto every line, e.g. `relay` or `tabsync`.
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset.
    pub default_level: String,
    pub log_path: Option<PathBuf>,
    pub also_stderr: bool,
    pub mode: ObservabilityMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "tabsync".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            mode: ObservabilityMode::default(),
        }
    }
}

pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..LogConfig::default()
    });
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    dev::install(&config);

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .finish()
            .try_init();
    }
}
