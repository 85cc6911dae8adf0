//! The relational destination the importer writes into.
//!
//! The pipeline only talks to a [`Destination`] (a connection factory) and the
//! [`Connection`]s it hands out. Two implementations ship with the crate:
//!
//! - [`sqlite::SqliteDestination`]: a SQLite database file via `rusqlite`.
//! - [`memory::MemoryDestination`]: an in-process store for dry runs and tests.
//!
//! Which one a run uses is decided by [`open_target`] from the `--target` value.

pub mod memory;
pub mod sqlite;

use std::path::PathBuf;

use thiserror::Error;

use crate::{
    config::{BulkCopyOptions, LoadOptions},
    dialect::{CreateTable, Dialect, TableName, declared_length},
    reader::SourceError,
};

/// One row on its way to the destination; `None` marks an empty source field.
pub type Row = Vec<Option<String>>;

pub type RowStream<'a> = dyn Iterator<Item = Result<Row, SourceError>> + 'a;

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// The destination refused an operation; the message is reported verbatim.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Table {0} does not exist")]
    MissingTable(String),
    #[error("No transaction is active")]
    NoTransaction,
    #[error("Unrecognised target '{0}' (expected `memory`, `sqlite:<path>` or a database file path)")]
    UnknownTarget(String),
}

/// Column metadata as the destination reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationColumn {
    pub name: String,
    pub type_name: String,
    pub max_length: Option<usize>,
    pub nullable: bool,
    pub default: Option<String>,
}

impl DestinationColumn {
    /// A nullable column without a default; the max length is read from the
    /// declared type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        DestinationColumn {
            name: name.into(),
            max_length: declared_length(&type_name),
            type_name,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Everything a single bulk copy needs.
pub struct BulkCopy<'a, 'r> {
    pub table: &'a TableName,
    pub rows: &'a mut RowStream<'r>,
    pub options: &'a BulkCopyOptions,
    /// Rows per batch; 0 sends everything as one batch.
    pub batch_size: usize,
    /// Progress interval in copied rows; 0 disables notifications.
    pub notify_after: u64,
    pub progress: &'a mut dyn FnMut(u64),
}

pub trait Destination {
    fn describe(&self) -> String;

    fn dialect(&self) -> Dialect;

    fn connect(&self) -> Result<Box<dyn Connection>, DestinationError>;
}

pub trait Connection {
    fn database_exists(&mut self, database: &str) -> Result<bool, DestinationError>;

    fn table_exists(&mut self, table: &TableName) -> Result<bool, DestinationError>;

    fn describe_table(
        &mut self,
        table: &TableName,
    ) -> Result<Vec<DestinationColumn>, DestinationError>;

    fn create_table(&mut self, ddl: &CreateTable) -> Result<(), DestinationError>;

    fn begin(&mut self, options: &BulkCopyOptions) -> Result<(), DestinationError>;

    fn truncate(&mut self, table: &TableName) -> Result<(), DestinationError>;

    /// Streams rows into `table`, returning the destination's own count of
    /// rows written.
    fn bulk_copy(&mut self, request: BulkCopy<'_, '_>) -> Result<u64, DestinationError>;

    fn commit(&mut self) -> Result<(), DestinationError>;

    fn rollback(&mut self) -> Result<(), DestinationError>;

    fn close(self: Box<Self>) -> Result<(), DestinationError>;
}

/// Resolves a `--target` value to a destination.
///
/// `memory` selects the in-process store, `sqlite:<path>` or a bare path opens
/// (or creates) a SQLite database file.
pub fn open_target(
    target: &str,
    options: &LoadOptions,
) -> Result<Box<dyn Destination>, DestinationError> {
    let trimmed = target.trim();
    if trimmed.eq_ignore_ascii_case("memory") {
        return Ok(Box::new(memory::MemoryDestination::new(Dialect::SqlServer)));
    }
    let path = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    if path.is_empty() || path.contains("://") {
        return Err(DestinationError::UnknownTarget(target.to_string()));
    }
    Ok(Box::new(sqlite::SqliteDestination::new(
        PathBuf::from(path),
        options.timeout(),
    )))
}
