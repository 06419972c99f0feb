//! Workbook access: the stability probe, content checksums, and the trait
//! through which the external spreadsheet parser is consumed.

pub mod checksum;
pub mod probe;

pub use checksum::compute_checksum;
pub use probe::{StabilityCheck, StabilityProbe};

use std::path::Path;

/// The external spreadsheet parser, consumed as an opaque oracle.
///
/// The core never interprets workbook content itself; it only asks whether a
/// file is of the tracked kind and what identifying fields it carries. When no
/// inspector is wired in, modify events are always ingested and fields stay
/// empty.
pub trait WorkbookInspector: Send + Sync {
    /// Is this file a workbook of the tracked kind?
    fn is_tracked(&self, path: &Path) -> bool;

    /// Identifying fields extracted from the workbook, opaque to the core.
    fn identifying_fields(&self, path: &Path) -> Option<serde_json::Value> {
        let _ = path;
        None
    }
}
