//! Field plans: what each backfill job reads, writes and defaults
//!
//! A [`FieldPlan`] is the only thing that differs between jobs. The engine
//! reads the plan's source columns, applies each [`FieldMapping`] to build a
//! partial index update, optionally repairs null source columns, and stamps
//! index-only documents with the plan's reconciliation defaults.

use crate::index::{FieldSpec, IndexDocument};
use crate::source::SourceRecord;
use crate::timestamp::DEFAULT_TIMESTAMP;
use serde_json::{Map, Value};

/// Index fields every job makes sure exist before running.
pub const TIMESTAMP_FIELDS: [&str; 2] = ["created_at", "deleted_at"];

/// How a source column turns into an index field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Always write the normalized timestamp (null becomes the default).
    CopyTimestamp,
    /// Write the default only when the source value is null.
    DefaultWhenNull,
}

/// One source column to index field mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Source column read by the scan
    pub source_column: &'static str,
    /// Index field written
    pub target_field: &'static str,
    /// Conversion rule
    pub rule: FieldRule,
}

/// Bulk repair of null source values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBackfill {
    /// Column set where null
    pub column: &'static str,
    /// Value written
    pub value: i64,
}

/// Per-job description of the sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPlan {
    /// Checkpoint document key
    pub job_id: &'static str,
    /// Index fields derived from each source record
    pub mappings: Vec<FieldMapping>,
    /// Optional repair of the source before index writes
    pub source_backfill: Option<SourceBackfill>,
    /// Fields stamped on index-only documents; empty means no reconciliation
    pub reconcile_defaults: Vec<(&'static str, i64)>,
}

impl FieldPlan {
    /// Source columns the scan must read, without duplicates.
    pub fn source_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = Vec::new();
        let backfill = self.source_backfill.as_ref().map(|b| b.column);
        for column in self
            .mappings
            .iter()
            .map(|m| m.source_column)
            .chain(backfill)
        {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    /// Partial index update for one source record. May be empty, in which case
    /// nothing is written for the record.
    pub fn transform(&self, record: &SourceRecord) -> Map<String, Value> {
        let mut fields = Map::new();
        for mapping in &self.mappings {
            let raw = record.get(mapping.source_column);
            match mapping.rule {
                FieldRule::CopyTimestamp => {
                    fields.insert(
                        mapping.target_field.to_string(),
                        Value::from(raw.to_epoch_seconds()),
                    );
                }
                FieldRule::DefaultWhenNull if raw.is_null() => {
                    fields.insert(
                        mapping.target_field.to_string(),
                        Value::from(DEFAULT_TIMESTAMP),
                    );
                }
                FieldRule::DefaultWhenNull => {}
            }
        }
        fields
    }

    /// Ids in the batch whose backfill column is null.
    pub fn null_source_ids(&self, records: &[SourceRecord]) -> Vec<String> {
        match &self.source_backfill {
            Some(backfill) => records
                .iter()
                .filter(|r| r.get(backfill.column).is_null())
                .map(|r| r.id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether the job has an index-only reconciliation pass.
    pub fn has_reconciliation(&self) -> bool {
        !self.reconcile_defaults.is_empty()
    }

    /// The reconciliation update body.
    pub fn reconcile_fields(&self) -> Map<String, Value> {
        self.reconcile_defaults
            .iter()
            .map(|(field, value)| (field.to_string(), Value::from(*value)))
            .collect()
    }

    /// False when every default field already holds its default.
    pub fn needs_reconcile(&self, document: &IndexDocument) -> bool {
        self.reconcile_defaults
            .iter()
            .any(|(field, value)| document.fields.get(*field).and_then(Value::as_i64) != Some(*value))
    }

    /// Schema fields to ensure before any job runs.
    pub fn schema_fields() -> Vec<FieldSpec> {
        TIMESTAMP_FIELDS
            .iter()
            .map(|name| FieldSpec::optional_int64(*name))
            .collect()
    }
}

/// The backfill jobs this tool knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Job {
    /// Copy `created_at` into the index, then default index-only documents
    CreatedAt,
    /// Default null `deleted_at` in both the source and the index
    DeletedAt,
    /// Both fields in a single pass, then default index-only documents
    InventoryFields,
}

impl Job {
    /// Checkpoint document key for the job.
    pub fn checkpoint_id(&self) -> &'static str {
        match self {
            Job::CreatedAt => "backfill_created_at",
            Job::DeletedAt => "backfill_deleted_at",
            Job::InventoryFields => "backfill_inventory_fields",
        }
    }

    /// Build the job's field plan.
    pub fn plan(&self) -> FieldPlan {
        let created_at = FieldMapping {
            source_column: "created_at",
            target_field: "created_at",
            rule: FieldRule::CopyTimestamp,
        };
        let deleted_at = FieldMapping {
            source_column: "deleted_at",
            target_field: "deleted_at",
            rule: FieldRule::DefaultWhenNull,
        };
        let deleted_at_backfill = SourceBackfill {
            column: "deleted_at",
            value: DEFAULT_TIMESTAMP,
        };

        match self {
            Job::CreatedAt => FieldPlan {
                job_id: self.checkpoint_id(),
                mappings: vec![created_at],
                source_backfill: None,
                reconcile_defaults: vec![("created_at", DEFAULT_TIMESTAMP)],
            },
            Job::DeletedAt => FieldPlan {
                job_id: self.checkpoint_id(),
                mappings: vec![deleted_at],
                source_backfill: Some(deleted_at_backfill),
                reconcile_defaults: Vec::new(),
            },
            Job::InventoryFields => FieldPlan {
                job_id: self.checkpoint_id(),
                mappings: vec![deleted_at, created_at],
                source_backfill: Some(deleted_at_backfill),
                reconcile_defaults: vec![
                    ("created_at", DEFAULT_TIMESTAMP),
                    ("deleted_at", DEFAULT_TIMESTAMP),
                ],
            },
        }
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Job::CreatedAt => "created-at",
            Job::DeletedAt => "deleted-at",
            Job::InventoryFields => "inventory-fields",
        };
        f.write_str(name)
    }
}
