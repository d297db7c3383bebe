//! # Index Backfill Library
//!
//! Resumable backfill jobs that copy or default the `created_at` and
//! `deleted_at` timestamps of a PostgreSQL table into the Typesense collection
//! that mirrors it.
//!
//! ## Features
//!
//! - **Two-phase sync**: a seek-paginated scan of the source table, then an
//!   optional pass over the index that defaults documents with no source row
//! - **Resume Capability**: progress is checkpointed after every batch in
//!   MongoDB (or local JSON files) and picked up by the next run
//! - **Graceful Shutdown**: Ctrl+C / SIGTERM stop at the next record boundary,
//!   save the checkpoint once and exit cleanly
//! - **Idempotent Writes**: every update is safe to repeat, so re-running after
//!   a crash converges
//!
//! ## Quick Start
//!
//! ```no_run
//! use index_backfill::checkpoint::FileCheckpointStore;
//! use index_backfill::index::{TypesenseClient, TypesenseConfig};
//! use index_backfill::shutdown::ShutdownCoordinator;
//! use index_backfill::source::{PgSourceConfig, PgSourceReader};
//! use index_backfill::sync::{EngineSettings, Job, SyncEngine};
//! use std::sync::Arc;
//!
//! # async fn example(pg: PgSourceConfig, ts: TypesenseConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::new(
//!     Arc::new(PgSourceReader::connect(&pg).await?),
//!     Arc::new(TypesenseClient::new(&ts)?),
//!     Arc::new(FileCheckpointStore::new(".checkpoints")),
//!     Job::CreatedAt.plan(),
//!     EngineSettings::default(),
//!     ShutdownCoordinator::shared(),
//! );
//! let report = engine.run().await?;
//! println!("{:?} after {} records", report.outcome, report.checkpoint.counters.total_processed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`checkpoint`] - durable per-job progress documents
//! - [`source`] - paginated reads and bulk updates against the source table
//! - [`index`] - partial document updates and catalog listing on the index
//! - [`sync`] - the phase loops and per-job field plans
//! - [`timestamp`] - normalization of raw timestamps to epoch seconds
//! - [`shutdown`] - signal handling and the shared cancellation flag

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Durable checkpoints
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// Runtime configuration
pub mod config;

/// Search index access
pub mod index;

/// Observability metrics
pub mod metrics;

/// Graceful shutdown coordination
pub mod shutdown;

/// Source table access
pub mod source;

/// Sync engine
pub mod sync;

/// Timestamp normalization
pub mod timestamp;

pub use checkpoint::{Checkpoint, CheckpointStore, Phase};
pub use sync::{FieldPlan, Job, PhaseOutcome, SyncEngine};
pub use timestamp::RawTimestamp;
