use crate::database::{Database, DbError};
use crate::files::types::{DetectedFile, IngestReceipt, LogicalFile, RetentionPolicy, Revision};
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use tracing::{debug, info, warn};

impl Database {
    /// Create the file-tracking tables
    pub fn create_file_tables(&self) -> Result<(), DbError> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL UNIQUE COLLATE NOCASE,
                filepath TEXT NOT NULL,
                filesize_kb REAL NOT NULL DEFAULT 0,
                detected_at INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                current_revision INTEGER NOT NULL DEFAULT 1,
                fields TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS file_revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL,
                revision_number INTEGER NOT NULL,
                revision_path TEXT NOT NULL,
                checksum TEXT,
                created_at INTEGER NOT NULL,
                fields TEXT,
                UNIQUE (file_id, revision_number),
                FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_file_revisions_file_id ON file_revisions(file_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_detected_at ON files(detected_at)",
            [],
        )?;

        Ok(())
    }

    /// Record one accepted detection: create the logical file with revision 1,
    /// or append revision `current_revision + 1` and refresh the file row.
    ///
    /// The counter read, the revision insert and the retention eviction all
    /// run inside one immediate transaction under the store lock, so the
    /// counter cannot drift from the revision rows under concurrent events.
    pub fn record_detection(
        &self,
        detection: &DetectedFile,
        retention: &RetentionPolicy,
    ) -> Result<IngestReceipt, DbError> {
        let _guard = self.write_guard()?;
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = chrono::Utc::now().timestamp_millis();
        let fields_str = detection.fields.as_ref().map(|v| v.to_string());

        let existing: Option<(i64, i64)> = tx
            .query_row(
                "SELECT id, current_revision FROM files WHERE filename = ?1",
                [&detection.filename],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let receipt = match existing {
            Some((file_id, current)) => {
                let next = current + 1;

                tx.execute(
                    "INSERT INTO file_revisions (file_id, revision_number, revision_path, checksum, created_at, fields)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![file_id, next, detection.filepath, detection.checksum, now, fields_str],
                )?;
                let revision_id = tx.last_insert_rowid();

                // Refresh the file row; keep old fields when this detection
                // carried none.
                tx.execute(
                    "UPDATE files
                     SET filepath = ?1, filesize_kb = ?2, detected_at = ?3,
                         current_revision = ?4, fields = COALESCE(?5, fields)
                     WHERE id = ?6",
                    params![
                        detection.filepath,
                        detection.filesize_kb,
                        now,
                        next,
                        fields_str,
                        file_id
                    ],
                )?;

                if let Some(cap) = retention.max_revisions_per_file {
                    trim_revisions(&tx, file_id, cap)?;
                }

                IngestReceipt {
                    file_id,
                    revision_id,
                    revision_number: next,
                    created: false,
                }
            }
            None => {
                let total: i64 = tx.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
                if total >= retention.max_files as i64 {
                    evict_oldest_file(&tx)?;
                }

                tx.execute(
                    "INSERT INTO files (filename, filepath, filesize_kb, detected_at, fields)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        detection.filename,
                        detection.filepath,
                        detection.filesize_kb,
                        now,
                        fields_str
                    ],
                )?;
                let file_id = tx.last_insert_rowid();

                tx.execute(
                    "INSERT INTO file_revisions (file_id, revision_number, revision_path, checksum, created_at, fields)
                     VALUES (?1, 1, ?2, ?3, ?4, ?5)",
                    params![file_id, detection.filepath, detection.checksum, now, fields_str],
                )?;
                let revision_id = tx.last_insert_rowid();

                IngestReceipt {
                    file_id,
                    revision_id,
                    revision_number: 1,
                    created: true,
                }
            }
        };

        tx.commit()?;
        Ok(receipt)
    }

    /// Look up a logical file by its case-insensitive filename
    pub fn find_file(&self, filename: &str) -> Result<Option<LogicalFile>, DbError> {
        let conn = self.connect()?;
        let file = conn
            .query_row(
                "SELECT id, filename, filepath, filesize_kb, detected_at, processed, current_revision, fields
                 FROM files WHERE filename = ?1",
                [filename],
                map_file,
            )
            .optional()?;
        Ok(file)
    }

    /// Get a logical file by id
    pub fn get_file(&self, file_id: i64) -> Result<Option<LogicalFile>, DbError> {
        let conn = self.connect()?;
        let file = conn
            .query_row(
                "SELECT id, filename, filepath, filesize_kb, detected_at, processed, current_revision, fields
                 FROM files WHERE id = ?1",
                [file_id],
                map_file,
            )
            .optional()?;
        Ok(file)
    }

    /// List tracked files, most recently detected first
    pub fn list_files(&self) -> Result<Vec<LogicalFile>, DbError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, filename, filepath, filesize_kb, detected_at, processed, current_revision, fields
             FROM files ORDER BY detected_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], map_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    /// Count tracked logical files
    pub fn count_files(&self) -> Result<i64, DbError> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Mark a file as processed
    pub fn mark_file_processed(&self, file_id: i64) -> Result<(), DbError> {
        let conn = self.connect()?;
        let updated = conn.execute("UPDATE files SET processed = 1 WHERE id = ?1", [file_id])?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("file {}", file_id)));
        }
        Ok(())
    }

    /// List a file's revisions, newest first
    pub fn list_revisions(&self, file_id: i64) -> Result<Vec<Revision>, DbError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_id, revision_number, revision_path, checksum, created_at, fields
             FROM file_revisions WHERE file_id = ?1 ORDER BY revision_number DESC",
        )?;
        let rows = stmt.query_map([file_id], map_revision)?;

        let mut revisions = Vec::new();
        for row in rows {
            revisions.push(row?);
        }
        Ok(revisions)
    }

    /// Get a revision by id
    pub fn get_revision(&self, revision_id: i64) -> Result<Option<Revision>, DbError> {
        let conn = self.connect()?;
        let revision = conn
            .query_row(
                "SELECT id, file_id, revision_number, revision_path, checksum, created_at, fields
                 FROM file_revisions WHERE id = ?1",
                [revision_id],
                map_revision,
            )
            .optional()?;
        Ok(revision)
    }

    /// Remove a logical file, its revision rows and their backing paths
    pub fn remove_file(&self, file_id: i64) -> Result<(), DbError> {
        let _guard = self.write_guard()?;
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM files WHERE id = ?1", [file_id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(DbError::NotFound(format!("file {}", file_id)));
        }

        delete_file_records(&tx, file_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Drop records whose backing path no longer exists on disk.
    ///
    /// Run once when monitoring starts, before the backfill scan. Returns the
    /// number of files removed.
    pub fn sweep_missing_files(&self) -> Result<u32, DbError> {
        let stale: Vec<(i64, String)> = {
            let conn = self.connect()?;
            let mut stmt = conn.prepare("SELECT id, filepath FROM files")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, String>(1)?)))?;

            let mut stale = Vec::new();
            for row in rows {
                let (id, filepath) = row?;
                if !Path::new(&filepath).exists() {
                    stale.push((id, filepath));
                }
            }
            stale
        };

        let mut removed = 0;
        for (id, filepath) in stale {
            info!(file_id = id, path = %filepath, "sweeping file with missing backing path");
            match self.remove_file(id) {
                Ok(()) => removed += 1,
                // Another caller may have removed it in the meantime.
                Err(DbError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// Evict the single oldest tracked file before a new insert.
///
/// Deletes the backing paths of all its revisions, then its revision rows,
/// then its own row, in the same transaction as the caller's insert.
fn evict_oldest_file(tx: &Transaction<'_>) -> Result<(), DbError> {
    let oldest: Option<(i64, String)> = tx
        .query_row(
            "SELECT id, filename FROM files ORDER BY detected_at ASC, id ASC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((file_id, filename)) = oldest else {
        return Ok(());
    };

    info!(file_id, filename = %filename, "retention cap reached, evicting oldest tracked file");
    delete_file_records(tx, file_id)?;
    Ok(())
}

/// Delete a file's revision snapshots from disk, its revision rows, then the
/// file row itself. Snapshot paths shared with another tracked file survive.
fn delete_file_records(tx: &Transaction<'_>, file_id: i64) -> Result<(), DbError> {
    let mut stmt = tx.prepare(
        "SELECT DISTINCT revision_path FROM file_revisions
         WHERE file_id = ?1
           AND revision_path NOT IN
               (SELECT revision_path FROM file_revisions WHERE file_id != ?1)",
    )?;
    let rows = stmt.query_map([file_id], |row| row.get::<_, String>(0))?;

    let mut paths = Vec::new();
    for row in rows {
        paths.push(row?);
    }
    drop(stmt);

    for path in paths {
        if Path::new(&path).exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path, error = %e, "failed to delete revision backing path");
            }
        }
    }

    tx.execute("DELETE FROM file_revisions WHERE file_id = ?1", [file_id])?;
    tx.execute("DELETE FROM files WHERE id = ?1", [file_id])?;
    Ok(())
}

/// Trim a file's oldest revisions down to `cap` rows.
fn trim_revisions(tx: &Transaction<'_>, file_id: i64, cap: u32) -> Result<(), DbError> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM file_revisions WHERE file_id = ?1",
        [file_id],
        |row| row.get(0),
    )?;

    for _ in 0..(count - cap as i64).max(0) {
        let (revision_id, path): (i64, String) = tx.query_row(
            "SELECT id, revision_path FROM file_revisions
             WHERE file_id = ?1 ORDER BY revision_number ASC LIMIT 1",
            [file_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.execute("DELETE FROM file_revisions WHERE id = ?1", [revision_id])?;

        // The path is usually shared with newer revisions of the same file;
        // only remove it from disk once nothing references it anymore.
        let referenced: i64 = tx.query_row(
            "SELECT (SELECT COUNT(*) FROM file_revisions WHERE revision_path = ?1)
                  + (SELECT COUNT(*) FROM files WHERE filepath = ?1)",
            [&path],
            |row| row.get(0),
        )?;
        if referenced == 0 && Path::new(&path).exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path, error = %e, "failed to delete trimmed revision path");
            }
        }
        debug!(file_id, revision_id, "trimmed oldest revision");
    }
    Ok(())
}

fn map_file(row: &Row<'_>) -> rusqlite::Result<LogicalFile> {
    let fields: Option<String> = row.get(7)?;
    Ok(LogicalFile {
        id: row.get(0)?,
        filename: row.get(1)?,
        filepath: row.get(2)?,
        filesize_kb: row.get(3)?,
        detected_at: row.get(4)?,
        processed: row.get::<_, i64>(5)? != 0,
        current_revision: row.get(6)?,
        fields: fields.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn map_revision(row: &Row<'_>) -> rusqlite::Result<Revision> {
    let fields: Option<String> = row.get(6)?;
    Ok(Revision {
        id: row.get(0)?,
        file_id: row.get(1)?,
        revision_number: row.get(2)?,
        revision_path: row.get(3)?,
        checksum: row.get(4)?,
        created_at: row.get(5)?,
        fields: fields.and_then(|s| serde_json::from_str(&s).ok()),
    })
}
