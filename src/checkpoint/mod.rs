//! Durable checkpoints for resumable backfill jobs
//!
//! A job keeps exactly one checkpoint document, keyed by its job id. Stores
//! replace that document wholesale on every save and stamp it with a
//! `last_updated` time.
//!
//! - [`MongoCheckpointStore`] - production store backed by a MongoDB collection
//! - [`FileCheckpointStore`] - JSON files with atomic writes and advisory locks,
//!   for local runs without MongoDB

pub mod file;
pub mod mongo;
pub mod state;

use async_trait::async_trait;

pub use file::FileCheckpointStore;
pub use mongo::MongoCheckpointStore;
pub use state::{Checkpoint, Counters, Phase};

/// Format of the `last_updated` stamp attached on save
pub const LAST_UPDATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Key→document store holding one checkpoint per job
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the stored checkpoint without creating one.
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Load the checkpoint for `job_id`, creating it with defaults if absent.
    async fn load(&self, job_id: &str) -> Result<Checkpoint, CheckpointError>;

    /// Replace the stored checkpoint (upsert).
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Remove the checkpoint for `job_id`. Used by the operator reset command.
    async fn delete(&self, job_id: &str) -> Result<bool, CheckpointError>;

    /// Release any held connections.
    async fn close(&self) {}
}

/// Errors related to checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Could not reach the store
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Store rejected a read or write
    #[error("store error: {0}")]
    StoreError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// Checkpoint file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },
}

/// Current time in the `last_updated` format.
pub(crate) fn last_updated_now() -> String {
    chrono::Utc::now().format(LAST_UPDATED_FORMAT).to_string()
}
