//! Logging setup for the tabsync binaries.
//!
//! The JSONL sink lives under the same base directory as the extension
//! storage file, so `--base-dir` isolates logs along with state.

use crate::Paths;
use observability::{LogConfig, ObservabilityMode};
use std::path::PathBuf;

const SERVICE_NAME: &str = "tabsync";

/// Install the global subscriber at `level` (overridden by `RUST_LOG`).
///
/// Environment knobs:
/// - `TABSYNC_OBS_MODE=prod` keeps metadata only
/// - `TABSYNC_LOG_FILE` replaces `<base>/logs/dev.jsonl`
/// - `TABSYNC_LOG_STDERR` mirrors events to stderr
pub fn init_logging(paths: &Paths, level: &str) {
    let mode = mode_from(std::env::var("TABSYNC_OBS_MODE").ok().as_deref());
    let log_path = std::env::var("TABSYNC_LOG_FILE")
        .ok()
        .as_deref()
        .and_then(trimmed)
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.log_file());

    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(log_path),
        also_stderr: std::env::var_os("TABSYNC_LOG_STDERR").is_some(),
        mode,
    });
}

fn mode_from(raw: Option<&str>) -> ObservabilityMode {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("prod") | Some("production") => ObservabilityMode::ProdMetadataOnly,
        _ => ObservabilityMode::DevVerbose,
    }
}

fn trimmed(raw: &str) -> Option<&str> {
    Some(raw.trim()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_verbose() {
        assert_eq!(mode_from(None), ObservabilityMode::DevVerbose);
        assert_eq!(mode_from(Some("dev")), ObservabilityMode::DevVerbose);
        assert_eq!(mode_from(Some("anything")), ObservabilityMode::DevVerbose);
    }

    #[test]
    fn test_prod_mode_is_case_insensitive() {
        assert_eq!(mode_from(Some("PROD")), ObservabilityMode::ProdMetadataOnly);
        assert_eq!(
            mode_from(Some(" production ")),
            ObservabilityMode::ProdMetadataOnly
        );
    }

    #[test]
    fn test_blank_override_is_ignored() {
        assert_eq!(trimmed("   "), None);
        assert_eq!(trimmed(" /tmp/x.jsonl "), Some("/tmp/x.jsonl"));
    }
}
