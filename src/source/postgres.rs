//! PostgreSQL source reader
//!
//! Holds a single-connection pool. Every fetch is preceded by a `SELECT 1`
//! liveness check; the pool tests connections before handing them out and
//! reconnects transparently when the old one went stale.
//!
//! Table, column and key type names are spliced into SQL, so they are
//! validated against a conservative character set first. Cursor values and ids
//! are always bound as text and cast to the key type on the server. Index ids
//! checked for membership are parsed for uuid and integer keys first; an id
//! that cannot be a key is simply absent instead of failing the whole query.

use super::{SourceError, SourceReader, SourceRecord, SourceResult};
use crate::timestamp::RawTimestamp;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Alias for the key column in generated queries
const KEY_ALIAS: &str = "__backfill_key";

/// SQLSTATE codes worth retrying: query canceled (statement timeout),
/// serialization failure, deadlock, admin shutdown, cannot connect now
const RETRYABLE_SQLSTATES: &[&str] = &["57014", "40001", "40P01", "57P01", "57P03"];

/// Key types whose ids are parsed before they reach a typed comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Uuid,
    Integer { min: i64, max: i64 },
    /// Compared as text, so any id is a valid candidate
    Other,
}

impl KeyKind {
    fn from_type_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "uuid" => KeyKind::Uuid,
            "smallint" | "int2" => KeyKind::Integer {
                min: i16::MIN.into(),
                max: i16::MAX.into(),
            },
            "integer" | "int" | "int4" => KeyKind::Integer {
                min: i32::MIN.into(),
                max: i32::MAX.into(),
            },
            "bigint" | "int8" => KeyKind::Integer {
                min: i64::MIN,
                max: i64::MAX,
            },
            _ => KeyKind::Other,
        }
    }

    /// Key text as the server renders it, or `None` when `id` cannot be a key.
    fn canonical(&self, id: &str) -> Option<String> {
        match self {
            KeyKind::Uuid => Uuid::parse_str(id)
                .ok()
                .map(|uuid| uuid.hyphenated().to_string()),
            KeyKind::Integer { min, max } => id
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|n| (*min..=*max).contains(n))
                .map(|n| n.to_string()),
            KeyKind::Other => Some(id.to_string()),
        }
    }
}

/// Membership query; keys of unparsed types are compared as text.
fn exists_sql(kind: KeyKind, table: &str, key: &str, key_type: &str) -> String {
    match kind {
        KeyKind::Other => {
            format!("SELECT {key}::text FROM {table} WHERE {key}::text = ANY($1::text[])")
        }
        KeyKind::Uuid | KeyKind::Integer { .. } => format!(
            "SELECT {key}::text FROM {table} WHERE {key} = ANY(CAST($1 AS {key_type}[]))"
        ),
    }
}

/// Group ids by their canonical key, dropping ids that cannot be keys.
fn membership_candidates(kind: KeyKind, ids: &[String]) -> HashMap<String, Vec<String>> {
    let mut candidates: HashMap<String, Vec<String>> = HashMap::new();
    for id in ids {
        if let Some(key) = kind.canonical(id) {
            candidates.entry(key).or_default().push(id.clone());
        }
    }
    candidates
}

/// Connection and table settings for [`PgSourceReader`]
#[derive(Debug, Clone)]
pub struct PgSourceConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub database: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Connect/acquire timeout
    pub connect_timeout: Duration,
    /// Qualified table name, e.g. `public.products`
    pub table: String,
    /// Ordering key column
    pub key_column: String,
    /// SQL type of the key column, e.g. `uuid`
    pub key_type: String,
}

/// Source reader over one PostgreSQL table
pub struct PgSourceReader {
    pool: PgPool,
    table: String,
    key_column: String,
    key_type: String,
    key_kind: KeyKind,
}

impl std::fmt::Debug for PgSourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSourceReader")
            .field("table", &self.table)
            .field("key_column", &self.key_column)
            .finish()
    }
}

impl PgSourceReader {
    /// Validate names, open the pool and run the first liveness check.
    pub async fn connect(config: &PgSourceConfig) -> SourceResult<Self> {
        validate_identifier(&config.table)?;
        validate_identifier(&config.key_column)?;
        validate_type_name(&config.key_type)?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .application_name("index-backfill");

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let reader = Self {
            pool,
            table: config.table.clone(),
            key_column: config.key_column.clone(),
            key_type: config.key_type.clone(),
            key_kind: KeyKind::from_type_name(&config.key_type),
        };
        reader.ensure_alive().await?;
        info!(
            host = %config.host,
            database = %config.database,
            table = %config.table,
            "Connected to source database"
        );
        Ok(reader)
    }

    /// Liveness check; a failure here means the pool could not reconnect.
    pub async fn ensure_alive(&self) -> SourceResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    fn fetch_sql(&self, columns: &[&str], with_cursor: bool) -> String {
        let mut select = vec![format!("{}::text AS {KEY_ALIAS}", self.key_column)];
        select.extend(
            columns
                .iter()
                .map(|column| format!("to_jsonb({column}) AS {column}")),
        );
        let filter = if with_cursor {
            format!(
                "WHERE {} > CAST($1 AS {}) ",
                self.key_column, self.key_type
            )
        } else {
            String::new()
        };
        let limit = if with_cursor { "$2" } else { "$1" };
        format!(
            "SELECT {} FROM {} {filter}ORDER BY {} LIMIT {limit}",
            select.join(", "),
            self.table,
            self.key_column
        )
    }
}

#[async_trait]
impl SourceReader for PgSourceReader {
    async fn fetch_batch(
        &self,
        cursor: &str,
        size: usize,
        columns: &[&str],
    ) -> SourceResult<Vec<SourceRecord>> {
        for column in columns {
            validate_identifier(column)?;
        }
        self.ensure_alive().await?;

        let limit = i64::try_from(size).unwrap_or(i64::MAX);
        let sql = self.fetch_sql(columns, !cursor.is_empty());
        let query = if cursor.is_empty() {
            sqlx::query(&sql).bind(limit)
        } else {
            sqlx::query(&sql).bind(cursor).bind(limit)
        };
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(KEY_ALIAS).map_err(map_sqlx_error)?;
            let mut values = Vec::with_capacity(columns.len());
            for column in columns {
                let raw: Option<serde_json::Value> =
                    row.try_get(*column).map_err(map_sqlx_error)?;
                values.push((*column, RawTimestamp::from(raw)));
            }
            records.push(SourceRecord::new(id, values));
        }

        debug!(cursor, fetched = records.len(), "Fetched source batch");
        Ok(records)
    }

    async fn exists_among(&self, ids: &[String]) -> SourceResult<HashSet<String>> {
        let candidates = membership_candidates(self.key_kind, ids);
        let kept: usize = candidates.values().map(Vec::len).sum();
        if kept < ids.len() {
            debug!(
                key_type = %self.key_type,
                skipped = ids.len() - kept,
                "Ids that cannot be keys treated as absent"
            );
        }
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let sql = exists_sql(self.key_kind, &self.table, &self.key_column, &self.key_type);
        let keys: Vec<String> = candidates.keys().cloned().collect();
        let found: Vec<String> = sqlx::query_scalar(&sql)
            .bind(keys)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(found
            .iter()
            .filter_map(|key| candidates.get(key))
            .flatten()
            .cloned()
            .collect())
    }

    async fn update_field(&self, ids: &[String], column: &str, value: i64) -> SourceResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        validate_identifier(column)?;
        let sql = format!(
            "UPDATE {table} SET {column} = $1 \
             WHERE {key} = ANY(CAST($2 AS {ty}[])) AND {column} IS NULL",
            table = self.table,
            key = self.key_column,
            ty = self.key_type
        );

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        match sqlx::query(&sql)
            .bind(value)
            .bind(ids)
            .execute(&mut *tx)
            .await
        {
            Ok(result) => {
                tx.commit()
                    .await
                    .map_err(|e| SourceError::TransactionError(format!("commit: {e}")))?;
                Ok(result.rows_affected())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                // Rolled back either way; only connection loss and retryable
                // SQLSTATEs are worth another attempt
                Err(map_sqlx_error(e))
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Source connection closed");
    }
}

fn map_sqlx_error(error: sqlx::Error) -> SourceError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SourceError::ConnectionError(error.to_string()),
        sqlx::Error::Database(ref db)
            if db
                .code()
                .is_some_and(|code| RETRYABLE_SQLSTATES.iter().any(|s| *s == code)) =>
        {
            SourceError::Unavailable(error.to_string())
        }
        other => SourceError::QueryError(other.to_string()),
    }
}

/// Accept `name` or `schema.name` made of ASCII letters, digits and `_`.
fn validate_identifier(name: &str) -> SourceResult<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            part.chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidIdentifier(name.to_string()))
    }
}

/// Accept type names such as `uuid`, `bigint` or `character varying`.
fn validate_type_name(name: &str) -> SourceResult<()> {
    let trimmed = name.trim();
    if !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
    {
        Ok(())
    } else {
        Err(SourceError::InvalidIdentifier(name.to_string()))
    }
}
