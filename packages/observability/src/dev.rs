//! Central JSONL file sink.
//!
//! Several contexts may append to the same file; every line is written and
//! flushed under one lock so lines from different producers never interleave.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// `~/.tabsync/logs/dev.jsonl`, under the temp dir when there is no home.
fn default_log_path() -> PathBuf {
    let base = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    base.join(".tabsync").join("logs").join("dev.jsonl")
}

/// Shared append-only handle on the log file. Clones write to the same file.
#[derive(Clone)]
pub(crate) struct AppendWriter {
    file: Arc<Mutex<File>>,
}

impl AppendWriter {
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

impl Write for AppendWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.write_all(buf)?;
        file.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for AppendWriter {
    type Writer = AppendWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn filter_for(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
}

/// Install the global subscriber: JSONL file sink plus an optional compact
/// stderr layer. Stderr is forced on when the file cannot be opened.
pub(crate) fn install(config: &LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let file_layer = match AppendWriter::open(&log_path) {
        Ok(writer) => Some(
            JsonLayer::new(config.service_name.clone(), writer, config.mode)
                .with_filter(filter_for(config)),
        ),
        Err(e) => {
            eprintln!("observability: cannot open {}: {}", log_path.display(), e);
            None
        }
    };

    let stderr_layer = (config.also_stderr || file_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_filter(filter_for(config))
    });

    let installed = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            log_path = %log_path.display(),
            "logging ready"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("logs").join("relay.jsonl");

        let mut writer = AppendWriter::open(&path).unwrap();
        writer.write_all(b"{\"level\":\"INFO\"}\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"level\":\"INFO\"}\n"
        );
    }

    #[test]
    fn test_producers_share_one_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.jsonl");

        let relay = AppendWriter::open(&path).unwrap();
        let mirror = AppendWriter::open(&path).unwrap();
        relay.make_writer().write_all(b"relay\n").unwrap();
        mirror.make_writer().write_all(b"mirror\n").unwrap();
        relay.make_writer().write_all(b"relay\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "relay\nmirror\nrelay\n");
    }
}
