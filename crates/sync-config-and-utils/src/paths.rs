//! On-disk layout of the extension host:
//!
//! ```text
//! ~/.tabsync/
//!   config.json
//!   storage.local.json   extension local storage, one JSON object
//!   logs/dev.jsonl
//! ```

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Rooted at `~/.tabsync`.
    pub fn new() -> CoreResult<Self> {
        dirs::home_dir()
            .map(|home| Self::with_base_dir(home.join(".tabsync")))
            .ok_or_else(|| CoreError::Path("no home directory for ~/.tabsync".to_string()))
    }

    pub fn with_base_dir(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn base_dir(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn store_file(&self) -> PathBuf {
        self.root.join("storage.local.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("dev.jsonl")
    }

    /// Create the base and log directories. Idempotent.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_under_custom_root() {
        let root = PathBuf::from("/tmp/tabsync-layout");
        let paths = Paths::with_base_dir(root.clone());

        assert_eq!(paths.base_dir(), root.as_path());
        assert_eq!(paths.config_file(), root.join("config.json"));
        assert_eq!(paths.store_file(), root.join("storage.local.json"));
        assert_eq!(paths.log_file(), root.join("logs").join("dev.jsonl"));
    }

    #[test]
    fn test_default_root_is_in_home() {
        let paths = Paths::new().unwrap();
        assert!(paths.base_dir().ends_with(".tabsync"));
    }

    #[test]
    fn test_ensure_dirs_twice() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("fresh"));

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.base_dir().is_dir());
        assert!(paths.logs_dir().is_dir());
    }
}
