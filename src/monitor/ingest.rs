use crate::database::{Database, DbError};
use crate::excel::{compute_checksum, WorkbookInspector};
use crate::files::{DetectedFile, IngestReceipt, RetentionPolicy};
use std::path::Path;
use tracing::{debug, warn};

/// Shared ingestion routine for live events, startup backfill and seed copies.
///
/// Creates the logical file on first detection, appends a revision otherwise.
/// Every call appends; deduplicating redundant notifications is the watcher's
/// job, not this function's.
pub fn ingest(
    db: &Database,
    path: &Path,
    inspector: Option<&dyn WorkbookInspector>,
    retention: &RetentionPolicy,
) -> Result<IngestReceipt, DbError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            DbError::Validation(format!("path has no usable filename: {}", path.display()))
        })?;

    let filesize_kb = std::fs::metadata(path)
        .map(|m| m.len() as f64 / 1024.0)
        .unwrap_or(0.0);

    let checksum = match compute_checksum(path) {
        Ok(checksum) => Some(checksum),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not checksum detected file");
            None
        }
    };

    let fields = inspector.and_then(|i| i.identifying_fields(path));

    let detection = DetectedFile {
        filename: filename.to_string(),
        filepath: path.to_string_lossy().into_owned(),
        filesize_kb,
        checksum,
        fields,
    };

    let receipt = db.record_detection(&detection, retention)?;
    debug!(
        path = %path.display(),
        file_id = receipt.file_id,
        revision = receipt.revision_number,
        created = receipt.created,
        "detection recorded"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FieldInspector;

    impl WorkbookInspector for FieldInspector {
        fn is_tracked(&self, _path: &Path) -> bool {
            true
        }

        fn identifying_fields(&self, _path: &Path) -> Option<serde_json::Value> {
            Some(serde_json::json!({"part_number": "PN-100"}))
        }
    }

    #[test]
    fn test_ingest_creates_then_appends() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("store.db")).unwrap();
        let policy = RetentionPolicy::default();

        let path = dir.path().join("BOM_rev2.xlsx");
        std::fs::write(&path, b"workbook bytes").unwrap();

        let first = ingest(&db, &path, None, &policy).unwrap();
        assert!(first.created);
        assert_eq!(first.revision_number, 1);

        let second = ingest(&db, &path, None, &policy).unwrap();
        assert!(!second.created);
        assert_eq!(second.revision_number, 2);

        let file = db.get_file(first.file_id).unwrap().unwrap();
        assert_eq!(file.current_revision, 2);

        let revisions = db.list_revisions(first.file_id).unwrap();
        assert_eq!(revisions.len(), 2);
        assert!(revisions[0].checksum.is_some());
    }

    #[test]
    fn test_ingest_records_inspector_fields() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("store.db")).unwrap();
        let policy = RetentionPolicy::default();

        let path = dir.path().join("Panel.xlsx");
        std::fs::write(&path, b"bytes").unwrap();

        let inspector = FieldInspector;
        let receipt = ingest(&db, &path, Some(&inspector), &policy).unwrap();

        let file = db.get_file(receipt.file_id).unwrap().unwrap();
        assert_eq!(
            file.fields,
            Some(serde_json::json!({"part_number": "PN-100"}))
        );
    }
}
