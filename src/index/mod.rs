//! Search index access
//!
//! The index mirrors the source table. Writes are partial document updates that
//! report a missing document as [`UpdateOutcome::NotFound`] instead of failing;
//! reads page through the whole collection with a match-all query.

pub mod typesense;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use typesense::{TypesenseClient, TypesenseConfig};

/// Largest page the index service returns for one search request
pub const MAX_PAGE_SIZE: usize = 250;

/// Index errors
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Network failure or timeout
    #[error("network error: {0}")]
    NetworkError(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    HttpError {
        /// Response status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Response body did not have the expected shape
    #[error("parse error: {0}")]
    ParseError(String),

    /// Client could not be built from the given settings
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IndexError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::NetworkError(_) => true,
            IndexError::HttpError { status, .. } => *status == 429 || *status >= 500,
            IndexError::ParseError(_) | IndexError::InvalidConfig(_) => false,
        }
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Result of a single partial update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Document existed and was updated
    Updated,
    /// No document with that id
    NotFound,
    /// Any other failure, with a short description
    Failed(String),
}

/// Field definition for schema patches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,
    /// Index type, e.g. `int64`
    #[serde(rename = "type")]
    pub field_type: String,
    /// Whether documents may omit the field
    #[serde(default)]
    pub optional: bool,
}

impl FieldSpec {
    /// Optional `int64` field, the shape used for epoch timestamps.
    pub fn optional_int64(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: "int64".to_string(),
            optional: true,
        }
    }
}

/// A document returned by catalog listing
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    /// Document id
    pub id: String,
    /// Stored fields, `id` included
    pub fields: Map<String, Value>,
}

/// Partial-update and listing access to one index collection
#[async_trait]
pub trait IndexWriter: Send + Sync {
    /// Merge `fields` into the document with the given id.
    async fn update_document(&self, id: &str, fields: &Map<String, Value>) -> UpdateOutcome;

    /// Add any of `fields` missing from the collection schema. Returns the
    /// names that were added.
    async fn ensure_schema_fields(&self, fields: &[FieldSpec]) -> IndexResult<Vec<String>>;

    /// Fetch one page of a match-all listing. `page` is 0-based.
    async fn list_page(&self, page: u64, page_size: usize) -> IndexResult<Vec<IndexDocument>>;
}
