use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to acquire store lock")]
    Lock,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Handle to the revision store.
///
/// Every accessor opens its own short-lived connection, so background event
/// handlers and foreground callers never contend on a shared handle. The
/// `write_lock` serializes the few check-then-act sequences (retention
/// eviction, project revision numbering) that must be atomic with respect to
/// a preceding count/max query.
pub struct Database {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Database {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let db = Database {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        };

        db.create_file_tables()?;
        db.create_comparison_tables()?;

        Ok(db)
    }

    /// Open a fresh connection scoped to one store call.
    pub(crate) fn connect(&self) -> Result<Connection, DbError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// Enter the store-level critical section.
    pub(crate) fn write_guard(&self) -> Result<MutexGuard<'_, ()>, DbError> {
        self.write_lock.lock().map_err(|_| DbError::Lock)
    }
}
