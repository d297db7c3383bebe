//! Checkpoint document for a backfill job
//!
//! The persisted field names (`last_id`, `batch_no`, `updated_typesense`, ...)
//! match the documents written by the earlier backfill scripts so an existing
//! checkpoint collection can be resumed in place.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Which pass of the job the checkpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "u8")]
pub enum Phase {
    /// Cursor scan over the source table
    #[default]
    Scanning,
    /// Page scan over the index, defaulting index-only documents
    Reconciling,
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Scanning => 1,
            Phase::Reconciling => 2,
        }
    }
}

impl TryFrom<u64> for Phase {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Scanning),
            2 => Ok(Phase::Reconciling),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Scanning => "scanning",
            Phase::Reconciling => "reconciling",
        };
        write!(f, "{s}")
    }
}

/// Cumulative progress counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Source records visited by the scan
    pub total_processed: u64,
    /// Source rows changed by the source backfill step
    #[serde(rename = "updated_supabase")]
    pub updated_source: u64,
    /// Index documents updated during the scan
    #[serde(rename = "updated_typesense")]
    pub updated_index: u64,
    /// Index updates that found no document
    #[serde(rename = "not_found_typesense")]
    pub not_found_index: u64,
    /// Index updates that failed for any other reason
    #[serde(rename = "failed_typesense")]
    pub failed_index: u64,
    /// Index-only documents stamped with defaults during reconciliation
    pub default_set_count: u64,
}

impl Counters {
    /// Add another set of counters into this one.
    pub fn accumulate(&mut self, other: &Counters) {
        self.total_processed = self.total_processed.saturating_add(other.total_processed);
        self.updated_source = self.updated_source.saturating_add(other.updated_source);
        self.updated_index = self.updated_index.saturating_add(other.updated_index);
        self.not_found_index = self.not_found_index.saturating_add(other.not_found_index);
        self.failed_index = self.failed_index.saturating_add(other.failed_index);
        self.default_set_count = self
            .default_set_count
            .saturating_add(other.default_set_count);
    }
}

/// Durable progress of one backfill job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    /// Job identifier, also the document key
    #[serde(rename = "_id")]
    pub job_id: String,
    /// Current pass
    pub phase: Phase,
    /// Last source key committed by the scan (empty = start)
    #[serde(rename = "last_id")]
    pub cursor: String,
    /// Next index page to reconcile
    #[serde(rename = "last_page")]
    pub page: u64,
    /// Batches committed so far, across both phases
    #[serde(rename = "batch_no")]
    pub batch_number: u64,
    /// Cumulative counters
    #[serde(flatten)]
    pub counters: Counters,
}

impl Checkpoint {
    /// Fresh checkpoint with zero-valued defaults.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            phase: Phase::Scanning,
            cursor: String::new(),
            page: 0,
            batch_number: 0,
            counters: Counters::default(),
        }
    }

    /// Rebuild a checkpoint from a stored document, coercing each field.
    ///
    /// Integers may have been written as int32, int64, double or numeric
    /// strings by other tools. Fields that are missing or cannot be coerced
    /// keep their default value.
    pub fn from_document(job_id: impl Into<String>, doc: &Map<String, Value>) -> Self {
        let mut checkpoint = Checkpoint::new(job_id);

        checkpoint.phase = match coerce_u64(doc.get("phase")) {
            Some(raw) => Phase::try_from(raw).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring stored phase, starting from scan");
                Phase::Scanning
            }),
            None => Phase::Scanning,
        };
        checkpoint.cursor = coerce_string(doc.get("last_id")).unwrap_or_default();
        checkpoint.page = coerce_u64(doc.get("last_page")).unwrap_or(0);
        checkpoint.batch_number = coerce_u64(doc.get("batch_no")).unwrap_or(0);

        let counter = |name: &str| coerce_u64(doc.get(name)).unwrap_or(0);
        checkpoint.counters = Counters {
            total_processed: counter("total_processed"),
            updated_source: counter("updated_supabase"),
            updated_index: counter("updated_typesense"),
            not_found_index: counter("not_found_typesense"),
            failed_index: counter("failed_typesense"),
            default_set_count: counter("default_set_count"),
        };

        checkpoint
    }

    /// Serialize into the stored document shape.
    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Checkpoint always serializes to an object
            _ => Map::new(),
        }
    }

    /// Whether the scan has made any committed progress.
    pub fn has_progress(&self) -> bool {
        !self.cursor.is_empty() || self.page > 0 || self.batch_number > 0
    }
}

fn coerce_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
