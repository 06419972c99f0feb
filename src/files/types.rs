use serde::{Deserialize, Serialize};

/// A tracked spreadsheet identity, keyed by its case-insensitive filename.
///
/// The physical path can move between detections; the filename is the
/// identity. `current_revision` counts the revisions appended so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalFile {
    pub id: i64,
    pub filename: String,
    pub filepath: String,
    pub filesize_kb: f64,
    pub detected_at: i64,
    pub processed: bool,
    pub current_revision: i64,
    /// Identifying fields extracted by the workbook inspector, opaque here.
    pub fields: Option<serde_json::Value>,
}

/// One historical snapshot of a logical file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub id: i64,
    pub file_id: i64,
    /// 1-based, strictly increasing per file.
    pub revision_number: i64,
    pub revision_path: String,
    pub checksum: Option<String>,
    pub created_at: i64,
    pub fields: Option<serde_json::Value>,
}

/// What one accepted detection wrote into the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub file_id: i64,
    pub revision_id: i64,
    pub revision_number: i64,
    /// True when this detection created the logical file.
    pub created: bool,
}

/// Raw inputs for a detection, gathered by the ingestion routine.
#[derive(Debug, Clone)]
pub struct DetectedFile {
    pub filename: String,
    pub filepath: String,
    pub filesize_kb: f64,
    pub checksum: Option<String>,
    pub fields: Option<serde_json::Value>,
}

/// Caps on tracked files and, optionally, revisions kept per file.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Evict the oldest logical file before an insert would exceed this.
    pub max_files: u32,
    /// When set, trim a file's oldest revisions past this count. Off by
    /// default so `current_revision` always equals the stored revision count.
    pub max_revisions_per_file: Option<u32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            max_files: 10,
            max_revisions_per_file: None,
        }
    }
}
