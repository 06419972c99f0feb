//! Comparison records and project-scoped versioning.

pub mod naming;
pub mod storage;
pub mod types;

pub use naming::{clean_revision_name, derive_display_name};
pub use types::*;

use crate::database::{Database, DbError};
use crate::sync::SyncNotifier;

/// Record a comparison, then tell the sync collaborator about the committed
/// row. The local write is the durability boundary: by the time the notifier
/// runs the row exists, and whatever the notifier does cannot undo it.
pub fn record_and_notify(
    db: &Database,
    notifier: Option<&dyn SyncNotifier>,
    file_id: i64,
    revision_a_id: i64,
    revision_b_id: i64,
    changes_count: i64,
    diff_payload: &serde_json::Value,
) -> Result<i64, DbError> {
    let comparison_id = db.record_comparison(
        file_id,
        revision_a_id,
        revision_b_id,
        changes_count,
        diff_payload,
    )?;

    if let Some(notifier) = notifier {
        notifier.comparison_recorded(comparison_id);
    }

    Ok(comparison_id)
}
