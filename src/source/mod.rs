//! Source-of-truth table access
//!
//! The engine only needs three things from the relational side: seek-paginated
//! batches ordered by key, a batched membership check, and a bulk conditional
//! update. [`postgres::PgSourceReader`] implements them with `sqlx`.

pub mod postgres;

use crate::timestamp::RawTimestamp;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};

pub use postgres::{PgSourceConfig, PgSourceReader};

static NULL_TIMESTAMP: RawTimestamp = RawTimestamp::Null;

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Connection lost or unreachable; safe to retry
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Server could not complete the query right now (timeout, deadlock,
    /// shutdown in progress); safe to retry
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Query rejected by the database
    #[error("query error: {0}")]
    QueryError(String),

    /// Transaction failed and was rolled back
    #[error("transaction error: {0}")]
    TransactionError(String),

    /// Invalid table, column or type name in configuration
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl SourceError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::ConnectionError(_)
                | SourceError::Unavailable(_)
                | SourceError::TransactionError(_)
        )
    }
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// One row of the source table
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Ordering key, rendered as text
    pub id: String,
    /// Requested columns
    pub values: BTreeMap<String, RawTimestamp>,
}

impl SourceRecord {
    /// Build a record from `(column, value)` pairs.
    pub fn new<I, S>(id: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (S, RawTimestamp)>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Value of a column; columns that were not read count as null.
    pub fn get(&self, column: &str) -> &RawTimestamp {
        self.values.get(column).unwrap_or(&NULL_TIMESTAMP)
    }
}

/// Paginated read and bulk update access to the source table
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Fetch up to `size` records with key strictly greater than `cursor`,
    /// ordered by key. An empty cursor starts from the beginning.
    async fn fetch_batch(
        &self,
        cursor: &str,
        size: usize,
        columns: &[&str],
    ) -> SourceResult<Vec<SourceRecord>>;

    /// Return the subset of `ids` present in the table.
    async fn exists_among(&self, ids: &[String]) -> SourceResult<HashSet<String>>;

    /// Set `column = value` on the given rows where the column is null, in a
    /// single transaction. Returns the number of rows changed.
    async fn update_field(&self, ids: &[String], column: &str, value: i64) -> SourceResult<u64>;

    /// Release the connection.
    async fn close(&self) {}
}
