//! Per-batch progress lines
//!
//! Every committed batch or page emits one line carrying the cumulative
//! counters. The rate is computed over the current run only, so a resumed job
//! does not report the restored totals as instantaneous throughput.

use crate::checkpoint::{Checkpoint, Phase};
use std::time::{Duration, Instant};

/// Throughput tracking for one phase of one run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    phase: Phase,
    start_time: Instant,
    items_this_run: u64,
}

impl ProgressState {
    /// Start tracking a phase now.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            start_time: Instant::now(),
            items_this_run: 0,
        }
    }

    /// Count items handled by a committed batch.
    pub fn update(&mut self, items: u64) {
        self.items_this_run = self.items_this_run.saturating_add(items);
    }

    /// Items per second since the phase started in this run.
    pub fn rate(&self) -> f64 {
        rate(self.items_this_run, self.start_time.elapsed())
    }

    /// Progress line for a committed batch.
    pub fn format_line(&self, checkpoint: &Checkpoint, batch_len: usize) -> String {
        let c = &checkpoint.counters;
        match self.phase {
            Phase::Scanning => format!(
                "[scan] batch #{} | rows={} | last_id={} | processed={} | source_updated={} | \
                 index_updated={} | not_found={} | failed={} | {:.1} rows/s",
                checkpoint.batch_number,
                batch_len,
                checkpoint.cursor,
                c.total_processed,
                c.updated_source,
                c.updated_index,
                c.not_found_index,
                c.failed_index,
                self.rate()
            ),
            Phase::Reconciling => format!(
                "[reconcile] batch #{} | page={} | docs={} | default_set={} | {:.1} docs/s",
                checkpoint.batch_number,
                checkpoint.page.saturating_sub(1),
                batch_len,
                c.default_set_count,
                self.rate()
            ),
        }
    }
}

fn rate(items: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        items as f64 / secs
    } else {
        0.0
    }
}
