use crate::files::IngestReceipt;

/// External mirror of already-committed records.
///
/// Called after a local commit with the created record's id. The local write
/// is the durability boundary: implementations may retry, queue or drop
/// notifications, but nothing they do rolls back the local row. A mirror that
/// needs to acknowledge success calls `Database::mark_synced` itself.
pub trait SyncNotifier: Send + Sync {
    /// A revision was committed by the ingestion routine.
    fn revision_committed(&self, receipt: &IngestReceipt);

    /// A comparison row was committed.
    fn comparison_recorded(&self, comparison_id: i64);
}
