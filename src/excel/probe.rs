use calamine::{open_workbook_auto, Reader};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const DEFAULT_ATTEMPTS: u32 = 10;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Readiness check gating ingestion.
pub trait StabilityCheck: Send + Sync {
    fn is_stable(&self, path: &Path) -> bool;
}

/// Decides whether a workbook is fully written and safely openable.
///
/// An external authoring tool may still be writing the file when the create
/// event arrives, so each attempt tolerates any failure as "not yet stable"
/// and retries after a short backoff. No handle stays open across attempts.
#[derive(Debug, Clone)]
pub struct StabilityProbe {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for StabilityProbe {
    fn default() -> Self {
        StabilityProbe {
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl StabilityProbe {
    /// Bounded retry loop with an injectable sleep, for deterministic tests.
    /// Sleeps between attempts, not after the last one.
    pub fn probe_with_sleep(&self, path: &Path, mut sleep: impl FnMut(Duration)) -> bool {
        for attempt in 1..=self.attempts.max(1) {
            if workbook_opens(path) {
                return true;
            }
            if attempt < self.attempts {
                sleep(self.backoff);
            }
        }
        debug!(path = %path.display(), attempts = self.attempts, "file never became stable");
        false
    }
}

impl StabilityCheck for StabilityProbe {
    fn is_stable(&self, path: &Path) -> bool {
        self.probe_with_sleep(path, std::thread::sleep)
    }
}

/// One attempt: the path exists, is readable, opens as a workbook and exposes
/// at least one sheet.
fn workbook_opens(path: &Path) -> bool {
    if !path.exists() || File::open(path).is_err() {
        return false;
    }
    match open_workbook_auto(path) {
        Ok(workbook) => !workbook.sheet_names().is_empty(),
        Err(_) => false,
    }
}
