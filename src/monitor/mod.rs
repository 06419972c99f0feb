//! Directory monitoring: watches a root for spreadsheet artifacts and feeds
//! stable files into the revision store.

pub mod ingest;
pub mod watcher;

pub use ingest::ingest;
pub use watcher::DirectoryMonitor;

use crate::database::DbError;
use crate::files::RetentionPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Watcher lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Errors from the monitor's own setup. Per-event failures never surface
/// here; they are logged and the watcher keeps going.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("watch root does not exist: {0}")]
    RootNotFound(PathBuf),
    #[error("monitor is already running")]
    AlreadyRunning,
    #[error("failed to acquire monitor lock")]
    Lock,
    #[error("watch subscription failed: {0}")]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Configuration for a directory monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Root directory watched recursively.
    pub root: PathBuf,
    /// Scanned once at startup; matching files not already present are
    /// copied into the root and ingested as synthetic create events.
    pub seed_dir: Option<PathBuf>,
    /// Tracked extensions, compared case-insensitively.
    pub extensions: Vec<String>,
    /// Settle delay applied to modify events to coalesce rapid writes.
    pub settle_delay: Duration,
    pub retention: RetentionPolicy,
}

impl MonitorConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MonitorConfig {
            root: root.into(),
            seed_dir: None,
            extensions: vec!["xlsx".to_string(), "xls".to_string()],
            settle_delay: Duration::from_millis(100),
            retention: RetentionPolicy::default(),
        }
    }

    pub(crate) fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|t| t.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter_is_case_insensitive() {
        let config = MonitorConfig::new("/watch");
        assert!(config.matches_extension(Path::new("/watch/BOM.xlsx")));
        assert!(config.matches_extension(Path::new("/watch/BOM.XLSX")));
        assert!(config.matches_extension(Path::new("/watch/old.XLS")));
        assert!(!config.matches_extension(Path::new("/watch/notes.txt")));
        assert!(!config.matches_extension(Path::new("/watch/no_extension")));
    }
}
