//! sheetwatch tracks spreadsheet artifacts dropped into a directory tree.
//!
//! A [`DirectoryMonitor`] watches a root recursively, gates each detected file
//! through a [`StabilityProbe`] and feeds it into the SQLite-backed revision
//! store: one [`LogicalFile`] per case-insensitive filename, one
//! [`files::Revision`] per accepted detection, with oldest-first eviction once
//! the tracked-file cap is hit. A separate, pull-based comparison flow records
//! diffs between two revisions and attaches them to projects as auto-numbered,
//! display-named project revisions.
//!
//! Spreadsheet parsing, UI and cloud mirroring stay outside: the parser is
//! consumed through [`WorkbookInspector`], the mirror through [`SyncNotifier`].

pub mod comparisons;
pub mod database;
pub mod excel;
pub mod files;
pub mod monitor;
pub mod sync;

pub use comparisons::{
    clean_revision_name, derive_display_name, record_and_notify, Comparison, Project,
    ProjectRevision,
};
pub use database::{Database, DbError};
pub use excel::{compute_checksum, StabilityCheck, StabilityProbe, WorkbookInspector};
pub use files::{DetectedFile, IngestReceipt, LogicalFile, RetentionPolicy};
pub use monitor::{ingest, DirectoryMonitor, MonitorConfig, MonitorError, MonitorState};
pub use sync::SyncNotifier;
