//! CLI error types and conversions

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::index::IndexError;
use crate::metrics::MetricsError;
use crate::source::SourceError;
use crate::sync::SyncError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Checkpoint store error
    #[error("checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// Source database error
    #[error("source error: {0}")]
    SourceError(#[from] SourceError),

    /// Search index error
    #[error("index error: {0}")]
    IndexError(#[from] IndexError),

    /// Sync failure
    #[error("sync error: {0}")]
    SyncError(#[from] SyncError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Output could not be rendered
    #[error("output error: {0}")]
    OutputError(String),
}
