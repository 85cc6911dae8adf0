//! Drives a whole import run.
//!
//! Order of work:
//!
//! 1. validate options and every source (no destination contact yet)
//! 2. infer the schema from the first source and compile the query against it
//! 3. provision the destination table once
//! 4. load each file in its own transaction, sequentially
//!
//! Steps 1-3 abort the run on failure. A failure in step 4 is recorded on that
//! file's [`LoadResult`] and the next file is loaded.

use std::{
    cell::Cell,
    fs::File,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Context;
use log::{debug, info, warn};
use serde::{Serialize, Serializer};

use crate::{
    config::LoadOptions,
    destination::{Destination, Row},
    diagnostics,
    dialect::TableName,
    error::{ImportError, LoadError},
    provision::{Provisioned, TableProvisioner},
    query::RowQuery,
    reader::{DelimitedReader, open_sources},
    schema::{InferredSchema, infer_schema},
    table::{Align, render_aligned},
    transaction::BulkLoadTransaction,
};

/// Running copied-row total for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent<'a> {
    pub path: &'a Path,
    pub rows_copied: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadStatus {
    Success,
    /// Committed, but the destination skipped some rows (duplicates).
    Partial,
    RolledBack,
    /// Nothing was sent to the destination.
    Failed,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStatus::Success => "success",
            LoadStatus::Partial => "partial",
            LoadStatus::RolledBack => "rolled back",
            LoadStatus::Failed => "failed",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, LoadStatus::RolledBack | LoadStatus::Failed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub path: PathBuf,
    pub rows_attempted: u64,
    /// The destination's own count; zero unless the file committed.
    pub rows_copied: u64,
    #[serde(rename = "elapsedSecs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub status: LoadStatus,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<LoadError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub table: String,
    pub destination: String,
    /// DDL issued when the table had to be created.
    pub created_table: Option<String>,
    pub results: Vec<LoadResult>,
    #[serde(rename = "elapsedSecs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl ImportReport {
    pub fn total_rows_copied(&self) -> u64 {
        self.results.iter().map(|r| r.rows_copied).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &LoadResult> {
        self.results.iter().filter(|r| r.status.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// One line per file plus a totals line.
    pub fn summary(&self) -> String {
        let headers = ["file", "status", "attempted", "copied", "elapsed"].map(String::from);
        let mut rows = self
            .results
            .iter()
            .map(|r| {
                vec![
                    r.path.display().to_string(),
                    r.status.as_str().to_string(),
                    r.rows_attempted.to_string(),
                    r.rows_copied.to_string(),
                    format_elapsed(r.elapsed),
                ]
            })
            .collect::<Vec<_>>();
        rows.push(vec![
            "total".to_string(),
            format!("{} failed", self.failed().count()),
            self.results
                .iter()
                .map(|r| r.rows_attempted)
                .sum::<u64>()
                .to_string(),
            self.total_rows_copied().to_string(),
            format_elapsed(self.elapsed),
        ]);
        let align = [
            Align::Left,
            Align::Left,
            Align::Right,
            Align::Right,
            Align::Right,
        ];
        render_aligned(&headers, &rows, &align)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("Creating report {path:?}"))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Writing report {path:?}"))
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

fn serialize_error<S: Serializer>(
    value: &Option<LoadError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(error) => serializer.serialize_str(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Plans the query for the run: compiled once against the shared schema.
enum Plan {
    Ready {
        query: RowQuery,
        projected: InferredSchema,
    },
    Invalid(String),
}

pub struct ImportOrchestrator<'a> {
    destination: &'a dyn Destination,
    options: &'a LoadOptions,
}

impl<'a> ImportOrchestrator<'a> {
    pub fn new(destination: &'a dyn Destination, options: &'a LoadOptions) -> Self {
        ImportOrchestrator {
            destination,
            options,
        }
    }

    pub fn run(
        &self,
        inputs: &[PathBuf],
        progress: &mut dyn FnMut(&ProgressEvent<'_>),
    ) -> Result<ImportReport, ImportError> {
        let started = Instant::now();
        self.options.validate()?;
        let encoding = self.options.encoding()?;
        let readers = open_sources(
            inputs,
            self.options.delimiter,
            self.options.first_row_has_column_names,
            encoding,
        )?;
        info!(
            "Validated {} source file(s) with {} column(s) each",
            readers.len(),
            readers[0].field_count()
        );

        let schema = infer_schema(&readers[0])?;
        let table = self.options.table_name();
        let plan = match RowQuery::compile(&self.options.query, &schema) {
            Ok(query) => Plan::Ready {
                projected: schema.project(&query),
                query,
            },
            Err(err) => {
                warn!("Query '{}' is not usable: {err}", self.options.query);
                Plan::Invalid(err.to_string())
            }
        };

        let mut created_table = None;
        let results = match &plan {
            Plan::Ready { query, projected } => {
                let provisioned = TableProvisioner::new(self.destination).ensure(
                    &self.options.database,
                    &table,
                    projected,
                )?;
                if let Provisioned::Created { statement } = provisioned {
                    created_table = Some(statement);
                }
                let mut results = Vec::with_capacity(readers.len());
                for reader in &readers {
                    results.push(self.load_file(reader, &table, query, projected, progress));
                }
                results
            }
            Plan::Invalid(message) => readers
                .iter()
                .map(|reader| LoadResult {
                    path: reader.path().to_path_buf(),
                    rows_attempted: 0,
                    rows_copied: 0,
                    elapsed: Duration::ZERO,
                    status: LoadStatus::Failed,
                    error: Some(LoadError::Syntax {
                        message: message.clone(),
                    }),
                })
                .collect(),
        };

        let report = ImportReport {
            table: table.to_string(),
            destination: self.destination.describe(),
            created_table,
            results,
            elapsed: started.elapsed(),
        };
        info!(
            "Import finished: {} row(s) copied into {} in {}",
            report.total_rows_copied(),
            report.table,
            format_elapsed(report.elapsed)
        );
        Ok(report)
    }

    fn load_file(
        &self,
        reader: &DelimitedReader,
        table: &TableName,
        query: &RowQuery,
        projected: &InferredSchema,
        progress: &mut dyn FnMut(&ProgressEvent<'_>),
    ) -> LoadResult {
        let started = Instant::now();
        let path = reader.path();
        info!("Loading {path:?} into {table}");
        let attempted = Cell::new(0u64);
        let outcome = self.transfer(reader, table, query, &projected.names(), &attempted, progress);
        let rows_attempted = attempted.get();

        let (rows_copied, status, error) = match outcome {
            Ok(copied) if copied < rows_attempted => {
                warn!(
                    "{path:?}: the destination skipped {} of {rows_attempted} row(s)",
                    rows_attempted - copied
                );
                (copied, LoadStatus::Partial, None)
            }
            Ok(copied) => (copied, LoadStatus::Success, None),
            Err((status, error)) => {
                warn!("{path:?} was not loaded: {error}");
                (0, status, Some(error))
            }
        };
        let elapsed = started.elapsed();
        info!(
            "{path:?}: {} with {rows_copied} row(s) copied in {}",
            status.as_str(),
            format_elapsed(elapsed)
        );
        LoadResult {
            path: path.to_path_buf(),
            rows_attempted,
            rows_copied,
            elapsed,
            status,
            error,
        }
    }

    fn transfer(
        &self,
        reader: &DelimitedReader,
        table: &TableName,
        query: &RowQuery,
        source_columns: &[String],
        attempted: &Cell<u64>,
        progress: &mut dyn FnMut(&ProgressEvent<'_>),
    ) -> Result<u64, (LoadStatus, LoadError)> {
        let path = reader.path();
        let rows = reader
            .rows()
            .map_err(|err| (LoadStatus::Failed, LoadError::Generic(err.to_string())))?;
        let mut transaction = BulkLoadTransaction::open(self.destination, table, self.options)
            .map_err(|err| (LoadStatus::Failed, LoadError::Generic(err.to_string())))?;
        if self.options.truncate_before_load {
            transaction.truncate();
        }

        let mut stream = rows.filter_map(|row| match row {
            Ok(fields) => query.apply(fields).map(|fields| {
                attempted.set(attempted.get() + 1);
                Ok(to_cells(fields))
            }),
            Err(err) => Some(Err(err)),
        });
        let mut notify = |rows_copied: u64| progress(&ProgressEvent { path, rows_copied });
        let outcome = transaction.load(&mut stream, &mut notify);
        drop(transaction);

        outcome.map_err(|failure| {
            debug!(
                "{path:?}: load failed after {} reported row(s): {}",
                failure.last_progress, failure.error
            );
            let error = diagnostics::diagnose(
                failure.error,
                failure.last_progress,
                source_columns,
                self.destination,
                table,
            );
            (LoadStatus::RolledBack, error)
        })
    }
}

fn to_cells(fields: Vec<String>) -> Row {
    fields
        .into_iter()
        .map(|field| (!field.is_empty()).then_some(field))
        .collect()
}
