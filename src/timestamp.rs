//! Timestamp normalization for values read from the source table
//!
//! Source columns arrive in whatever shape the database hands back: SQL null,
//! integer or floating epoch seconds, ISO-8601 text, or a typed date-time.
//! [`RawTimestamp::to_epoch_seconds`] folds all of them into `i64` epoch
//! seconds and never fails: anything it cannot read becomes
//! [`DEFAULT_TIMESTAMP`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Fallback written for absent or unreadable timestamps.
pub const DEFAULT_TIMESTAMP: i64 = 0;

/// Date-time layouts that carry an explicit UTC offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
];

/// Date-time layouts without an offset, read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A timestamp value as read from the source, before normalization
///
/// # Examples
///
/// ```
/// use index_backfill::timestamp::RawTimestamp;
///
/// let raw = RawTimestamp::Text("2024-01-01T00:00:00Z".to_string());
/// assert_eq!(raw.to_epoch_seconds(), 1704067200);
/// assert_eq!(RawTimestamp::Null.to_epoch_seconds(), 0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    /// SQL null or a missing column
    Null,
    /// Integer epoch seconds
    Integer(i64),
    /// Floating epoch seconds
    Float(f64),
    /// ISO-8601 text
    Text(String),
    /// Already-typed date-time
    DateTime(DateTime<Utc>),
    /// Any other shape (objects, arrays, booleans, oversized integers)
    Unsupported,
}

impl RawTimestamp {
    /// Classify a JSON value produced by the source query.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => RawTimestamp::Null,
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RawTimestamp::Integer(i)
                } else if n.is_u64() {
                    RawTimestamp::Unsupported
                } else {
                    n.as_f64()
                        .map(RawTimestamp::Float)
                        .unwrap_or(RawTimestamp::Unsupported)
                }
            }
            Value::String(s) => RawTimestamp::Text(s.clone()),
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => RawTimestamp::Unsupported,
        }
    }

    /// Whether the source held no value at all.
    pub fn is_null(&self) -> bool {
        matches!(self, RawTimestamp::Null)
    }

    /// Normalize to epoch seconds, falling back to [`DEFAULT_TIMESTAMP`].
    pub fn to_epoch_seconds(&self) -> i64 {
        match self {
            RawTimestamp::Null | RawTimestamp::Unsupported => DEFAULT_TIMESTAMP,
            RawTimestamp::Integer(i) => *i,
            RawTimestamp::Float(f) => float_to_seconds(*f),
            RawTimestamp::Text(s) => parse_iso8601(s).unwrap_or(DEFAULT_TIMESTAMP),
            RawTimestamp::DateTime(dt) => dt.timestamp(),
        }
    }
}

impl From<Option<Value>> for RawTimestamp {
    fn from(value: Option<Value>) -> Self {
        value
            .as_ref()
            .map(RawTimestamp::from_json)
            .unwrap_or(RawTimestamp::Null)
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        RawTimestamp::DateTime(value)
    }
}

fn float_to_seconds(value: f64) -> i64 {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
    if !value.is_finite() || value >= i64::MAX as f64 || value < i64::MIN as f64 {
        return DEFAULT_TIMESTAMP;
    }
    value.trunc() as i64
}

/// Parse ISO-8601 text into epoch seconds.
///
/// A trailing `Z` is read as `+00:00`. Values without an offset are taken as
/// UTC, and a bare date means midnight UTC.
pub fn parse_iso8601(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = match trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
    {
        Some(rest) => format!("{rest}+00:00"),
        None => trimmed.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.timestamp());
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, format) {
            return Some(dt.timestamp());
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(dt.and_utc().timestamp());
        }
    }

    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}
