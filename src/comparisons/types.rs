use serde::{Deserialize, Serialize};

/// A stored diff between two revisions of the same logical file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub id: i64,
    pub file_id: i64,
    /// Caller-supplied order, not necessarily chronological.
    pub revision_a_id: i64,
    pub revision_b_id: i64,
    pub changes_count: i64,
    pub diff_payload: serde_json::Value,
    pub created_at: i64,
    /// Set once by the sync collaborator, never by this crate's core.
    pub synced: bool,
    pub external_id: Option<String>,
}

/// A named grouping of comparison results, independent of any single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub active: bool,
    pub updated_at: i64,
}

/// A project-scoped, auto-numbered entry wrapping one comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRevision {
    pub id: i64,
    pub project_id: i64,
    pub comparison_id: i64,
    /// 1-based, assigned as max(existing)+1, never reused after soft delete.
    pub revision_number: i64,
    pub display_name: String,
    pub created_at: i64,
    pub deleted: bool,
}
