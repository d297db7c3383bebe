//! Engine tuning constants

use crate::index::MAX_PAGE_SIZE;
use std::time::Duration;

/// Source records fetched per scanning batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Index documents listed per reconciliation page.
pub const DEFAULT_PAGE_SIZE: usize = MAX_PAGE_SIZE;

/// Pause between batches, to stay gentle on the index service.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(1);

/// Fixed wait before retrying a transient failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Runtime knobs for [`super::SyncEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Records per scanning batch
    pub batch_size: usize,
    /// Documents per reconciliation page, capped at [`MAX_PAGE_SIZE`]
    pub page_size: usize,
    /// Sleep after each committed batch or page
    pub batch_delay: Duration,
    /// Sleep before retrying a transient failure
    pub retry_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl EngineSettings {
    /// Clamp sizes into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }
}
