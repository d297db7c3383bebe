//! Resumable two-phase sync from the source table into the search index
//!
//! # Overview
//!
//! A job runs through up to two phases, recorded in its [`Checkpoint`]:
//!
//! 1. **Scanning**: seek-paginate the source table by key, turn each record
//!    into a partial index update through the job's [`FieldPlan`], and commit
//!    the cursor after every batch.
//! 2. **Reconciling**: page through the index catalog and stamp default values
//!    on documents whose id no longer exists in the source.
//!
//! Progress is persisted after every batch, so a crashed or interrupted run
//! resumes where the last commit left off. Re-processing a partially written
//! batch is harmless because every write is idempotent.
//!
//! # Components
//!
//! - [`engine`] - the phase loops, retries and interruption handling
//! - [`plan`] - per-job field plans and the [`Job`] catalog
//! - [`config`] - batch sizes and delays
//! - [`progress`] - per-batch progress lines
//!
//! [`Checkpoint`]: crate::checkpoint::Checkpoint

pub mod config;
pub mod engine;
pub mod plan;
pub mod progress;

use crate::checkpoint::CheckpointError;
use crate::index::IndexError;
use crate::source::SourceError;

pub use config::EngineSettings;
pub use engine::{RunReport, SyncEngine};
pub use plan::{FieldMapping, FieldPlan, FieldRule, Job, SourceBackfill};

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// All work for the job is done
    Completed,
    /// Shutdown requested; the checkpoint was saved
    Interrupted,
    /// Scan exhausted and the checkpoint now points at reconciliation
    ReconcileReady,
}

/// Sync errors. Anything reaching the caller is fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Checkpoint could not be loaded or persisted
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Non-retryable source failure
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Non-retryable index failure
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}
