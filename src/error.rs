use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{config::ConfigError, destination::DestinationError, diagnostics::ColumnComparison, reader::SourceError};

/// Failures that abort the whole run.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("No input files were provided")]
    NoInputs,
    #[error("Malformed input {path:?}: delimiter '{delimiter}' does not appear in the first line")]
    MalformedInput { path: PathBuf, delimiter: String },
    #[error(
        "Schema mismatch: {path:?} has {found} field(s) in its first line but {first:?} has {expected}"
    )]
    SchemaMismatch {
        path: PathBuf,
        first: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("Destination database '{0}' does not exist")]
    DestinationNotFound(String),
    #[error("Creating table {table} failed: {source}")]
    Provisioning {
        table: String,
        #[source]
        source: DestinationError,
    },
    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),
    #[error("Reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Failures isolated to one file; the file is rolled back and the run goes on.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(
        "The bulk statement was rejected: {message}. Simplify the query (for example `SELECT * FROM csvtable`) and check that every referenced column exists"
    )]
    Syntax { message: String },
    #[error(
        "A value exceeded the declared length of column '{column}' (max {}) somewhere after row {after_row} (approximate): {message}",
        describe_length(.max_length)
    )]
    ColumnOverflow {
        column: String,
        max_length: Option<usize>,
        after_row: u64,
        message: String,
    },
    #[error(
        "Type mismatch or unexpected null: {message}\nCheck that the source columns line up with the destination columns:\n{comparison}"
    )]
    TypeMismatch {
        message: String,
        comparison: ColumnComparison,
    },
    #[error("Reading source failed: {0}")]
    SourceRead(#[from] SourceError),
    #[error("{0}")]
    Generic(String),
}

fn describe_length(max_length: &Option<usize>) -> String {
    match max_length {
        Some(length) => length.to_string(),
        None => "unknown".to_string(),
    }
}
