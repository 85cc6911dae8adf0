//! Run configuration: [`LoadOptions`] and the destination's [`BulkCopyOptions`].
//!
//! Options come from an optional YAML file (camelCase keys) with CLI flags
//! layered on top. Everything is immutable once the run starts.
//!
//! ```yaml
//! delimiter: tab
//! firstRowHasColumnNames: true
//! batchSize: 5000
//! notifyAfter: 1000
//! truncateBeforeLoad: true
//! query: SELECT * FROM csvtable WHERE amount > 0
//! table: dbo.orders
//! bulkCopy:
//!   keepNulls: true
//!   tableLock: true
//! ```

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use encoding_rs::Encoding;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

use crate::{
    cli::parse_delimiter, dialect::TableName, io_utils, printable_delimiter, query::DEFAULT_QUERY,
};

pub const DEFAULT_BATCH_SIZE: usize = 75_000;
pub const DEFAULT_NOTIFY_AFTER: u64 = 75_000;
pub const DEFAULT_DATABASE: &str = "main";
/// Longest operation timeout a destination accepts (`i32::MAX` milliseconds).
pub const MAX_TIMEOUT_SECS: u64 = i32::MAX as u64 / 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Opening config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parsing config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("{0}")]
    Invalid(String),
}

/// Behaviour flags handed to the destination's bulk-copy primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkCopyOptions {
    /// Enforce check and foreign-key constraints while copying.
    pub check_constraints: bool,
    pub fire_triggers: bool,
    /// Keep source values for identity columns instead of letting the
    /// destination assign them.
    pub keep_identity: bool,
    /// Store empty fields as NULL even when the column has a default.
    pub keep_nulls: bool,
    /// Hold an exclusive lock for the whole copy.
    pub table_lock: bool,
    /// Run every batch in its own nested transaction.
    pub use_internal_transaction: bool,
    /// Skip rows that collide with existing keys instead of failing.
    pub ignore_duplicates: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LoadOptions {
    #[serde(
        serialize_with = "serialize_delimiter",
        deserialize_with = "deserialize_delimiter"
    )]
    pub delimiter: Option<u8>,
    pub first_row_has_column_names: bool,
    pub batch_size: usize,
    pub notify_after: u64,
    pub truncate_before_load: bool,
    pub query: String,
    pub database: String,
    pub table: String,
    pub input_encoding: Option<String>,
    /// Operation timeout; `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
    pub bulk_copy: BulkCopyOptions,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            delimiter: None,
            first_row_has_column_names: false,
            batch_size: DEFAULT_BATCH_SIZE,
            notify_after: DEFAULT_NOTIFY_AFTER,
            truncate_before_load: false,
            query: DEFAULT_QUERY.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            table: String::new(),
            input_encoding: None,
            timeout_secs: None,
            bulk_copy: BulkCopyOptions::default(),
        }
    }
}

impl LoadOptions {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_reader(BufReader::new(file)).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "A destination table name is required".to_string(),
            ));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "The destination database name cannot be empty".to_string(),
            ));
        }
        if self.query.trim().is_empty() {
            return Err(ConfigError::Invalid("The query cannot be empty".to_string()));
        }
        if self.timeout_secs.is_some_and(|secs| secs > MAX_TIMEOUT_SECS) {
            return Err(ConfigError::Invalid(format!(
                "The timeout cannot exceed {MAX_TIMEOUT_SECS} seconds"
            )));
        }
        self.encoding()?;
        Ok(())
    }

    pub fn encoding(&self) -> Result<&'static Encoding, ConfigError> {
        io_utils::resolve_encoding(self.input_encoding.as_deref()).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "Unknown encoding '{}'",
                self.input_encoding.as_deref().unwrap_or_default()
            ))
        })
    }

    pub fn table_name(&self) -> TableName {
        TableName::parse(&self.table)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn serialize_delimiter<S>(value: &Option<u8>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(delimiter) => serializer.serialize_str(&printable_delimiter(*delimiter)),
        None => serializer.serialize_none(),
    }
}

fn deserialize_delimiter<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|value| parse_delimiter(&value).map_err(de::Error::custom))
        .transpose()
}
