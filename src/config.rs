//! Runtime configuration
//!
//! Every setting is a clap argument with an environment fallback, so the tool
//! runs unchanged from a `.env` file (loaded by `main` through `dotenvy`) or
//! from explicit flags. Required connection values are optional at the clap
//! level and validated in [`ConnectionArgs::resolve`], which reports every
//! missing variable at once before any connection is attempted.

use crate::index::{TypesenseConfig, MAX_PAGE_SIZE};
use crate::source::PgSourceConfig;
use crate::sync::config::{DEFAULT_BATCH_SIZE, DEFAULT_PAGE_SIZE};
use crate::sync::EngineSettings;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more required variables are unset or empty
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    /// A value is present but unusable
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },
}

/// Everything `run` needs
#[derive(Debug, Clone)]
pub struct Settings {
    /// Source database
    pub source: PgSourceConfig,
    /// Search index
    pub index: TypesenseConfig,
    /// Checkpoint backend
    pub checkpoint: CheckpointSettings,
    /// Engine tuning
    pub engine: EngineSettings,
}

/// Checkpoint backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// MongoDB collection
    Mongo,
    /// JSON files in a local directory
    File,
}

/// Resolved checkpoint backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSettings {
    /// MongoDB store
    Mongo {
        /// Connection string
        uri: String,
        /// Database name
        database: String,
        /// Collection name
        collection: String,
    },
    /// File store
    File {
        /// Directory holding one file per job
        dir: PathBuf,
    },
}

/// Source, index and tuning arguments for `run`
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Source database host
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Source database port
    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<String>,

    /// Source database name
    #[arg(long, env = "DB_DATABASE")]
    pub db_database: Option<String>,

    /// Source database user
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Source database password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Source connect timeout in seconds
    #[arg(long, env = "DB_CONNECTION_TIMEOUT", default_value = "10", value_parser = parse_seconds)]
    pub db_connection_timeout: Duration,

    /// Source table, optionally schema-qualified
    #[arg(long, env = "SOURCE_TABLE", default_value = "public.products")]
    pub source_table: String,

    /// Ordering key column of the source table
    #[arg(long, env = "SOURCE_KEY_COLUMN", default_value = "id")]
    pub source_key_column: String,

    /// SQL type of the key column
    #[arg(long, env = "SOURCE_KEY_TYPE", default_value = "uuid")]
    pub source_key_type: String,

    /// Typesense host
    #[arg(long, env = "TYPESENSE_HOST")]
    pub typesense_host: Option<String>,

    /// Typesense port
    #[arg(long, env = "TYPESENSE_PORT")]
    pub typesense_port: Option<String>,

    /// Typesense admin API key
    #[arg(long, env = "TYPESENSE_API_KEY", hide_env_values = true)]
    pub typesense_api_key: Option<String>,

    /// `http` or `https`
    #[arg(long, env = "TYPESENSE_PROTOCOL", default_value = "http")]
    pub typesense_protocol: String,

    /// Typesense collection mirroring the source table
    #[arg(long, env = "TYPESENSE_COLLECTION", default_value = "products_search")]
    pub typesense_collection: String,

    /// Field used as `query_by` for match-all listings
    #[arg(long, env = "TYPESENSE_QUERY_BY", default_value = "product_name")]
    pub typesense_query_by: String,

    /// Typesense connect timeout in seconds
    #[arg(long, env = "TYPESENSE_CONNECTION_TIMEOUT", default_value = "10", value_parser = parse_seconds)]
    pub typesense_connection_timeout: Duration,

    /// Source rows per scanning batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Index documents per reconciliation page (max 250)
    #[arg(long, env = "TYPESENSE_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub typesense_page_size: usize,

    /// Seconds to sleep between batches
    #[arg(long, env = "SLEEP_BETWEEN_BATCHES", default_value = "1.0", value_parser = parse_seconds)]
    pub sleep_between_batches: Duration,

    /// Seconds to wait before retrying a transient failure
    #[arg(long, env = "FETCH_RETRY_DELAY", default_value = "5.0", value_parser = parse_seconds)]
    pub fetch_retry_delay: Duration,
}

/// Checkpoint backend arguments, shared by every command
#[derive(Args, Debug, Clone)]
pub struct CheckpointArgs {
    /// Where checkpoints are kept
    #[arg(long, env = "CHECKPOINT_STORE", value_enum, default_value = "mongo")]
    pub checkpoint_store: StoreKind,

    /// Directory for the file store
    #[arg(long, env = "CHECKPOINT_DIR", default_value = ".checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// MongoDB connection string
    #[arg(long, env = "MONGO_URI", hide_env_values = true)]
    pub mongo_uri: Option<String>,

    /// MongoDB database holding checkpoints
    #[arg(long, env = "MONGO_DB_NAME", default_value = "checkpoint_db")]
    pub mongo_db_name: String,

    /// MongoDB collection holding checkpoints
    #[arg(long, env = "MONGO_CHECKPOINT_COLLECTION", default_value = "inventory_backfill_checkpoint")]
    pub mongo_checkpoint_collection: String,
}

impl CheckpointArgs {
    /// Resolve the backend, recording missing variables in `missing`.
    fn resolve_into(&self, missing: &mut Vec<String>) -> CheckpointSettings {
        match self.checkpoint_store {
            StoreKind::Mongo => CheckpointSettings::Mongo {
                uri: required(&self.mongo_uri, "MONGO_URI", missing),
                database: self.mongo_db_name.clone(),
                collection: self.mongo_checkpoint_collection.clone(),
            },
            StoreKind::File => CheckpointSettings::File {
                dir: self.checkpoint_dir.clone(),
            },
        }
    }

    /// Resolve the backend on its own (for `status` and `reset`).
    pub fn resolve(&self) -> Result<CheckpointSettings, ConfigError> {
        let mut missing = Vec::new();
        let settings = self.resolve_into(&mut missing);
        if missing.is_empty() {
            Ok(settings)
        } else {
            Err(ConfigError::MissingEnv(missing))
        }
    }
}

impl ConnectionArgs {
    /// Validate and assemble the full settings for `run`.
    pub fn resolve(&self, checkpoint: &CheckpointArgs) -> Result<Settings, ConfigError> {
        let mut missing = Vec::new();
        let db_host = required(&self.db_host, "DB_HOST", &mut missing);
        let db_database = required(&self.db_database, "DB_DATABASE", &mut missing);
        let db_user = required(&self.db_user, "DB_USER", &mut missing);
        let db_password = required(&self.db_password, "DB_PASSWORD", &mut missing);
        let db_port = required(&self.db_port, "DB_PORT", &mut missing);
        let checkpoint = checkpoint.resolve_into(&mut missing);
        let ts_host = required(&self.typesense_host, "TYPESENSE_HOST", &mut missing);
        let ts_port = required(&self.typesense_port, "TYPESENSE_PORT", &mut missing);
        let ts_key = required(&self.typesense_api_key, "TYPESENSE_API_KEY", &mut missing);
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnv(missing));
        }

        if self.typesense_page_size == 0 || self.typesense_page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidValue {
                name: "TYPESENSE_PAGE_SIZE",
                value: self.typesense_page_size.to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "BATCH_SIZE",
                value: "0".to_string(),
            });
        }

        Ok(Settings {
            source: PgSourceConfig {
                host: db_host,
                port: parse_port(&db_port, "DB_PORT")?,
                database: db_database,
                user: db_user,
                password: db_password,
                connect_timeout: self.db_connection_timeout,
                table: self.source_table.clone(),
                key_column: self.source_key_column.clone(),
                key_type: self.source_key_type.clone(),
            },
            index: TypesenseConfig {
                protocol: self.typesense_protocol.clone(),
                host: ts_host,
                port: parse_port(&ts_port, "TYPESENSE_PORT")?,
                api_key: ts_key,
                collection: self.typesense_collection.clone(),
                query_by: self.typesense_query_by.clone(),
                connect_timeout: self.typesense_connection_timeout,
            },
            checkpoint,
            engine: EngineSettings {
                batch_size: self.batch_size,
                page_size: self.typesense_page_size,
                batch_delay: self.sleep_between_batches,
                retry_delay: self.fetch_retry_delay,
            },
        })
    }
}

/// Trimmed value, or record `name` as missing.
fn required(value: &Option<String>, name: &str, missing: &mut Vec<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

fn parse_port(value: &str, name: &'static str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

/// Parse a non-negative number of seconds, fractions allowed.
pub fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a number of seconds"))?;
    if secs < 0.0 {
        return Err(format!("'{s}' must not be negative"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("'{s}': {e}"))
}
