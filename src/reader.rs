//! Delimited source scanning and pre-load validation.
//!
//! A [`DelimitedReader`] is opened once per input file. Opening checks that the
//! delimiter appears in the first physical line and records how many fields the
//! first line splits into; [`open_sources`] then requires every source to agree
//! with the first one. Rows are produced lazily by [`DelimitedReader::rows`],
//! which reopens the file on every call so a source can be scanned more than
//! once (inference reads the first row, the load reads them all).

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use csv::ByteRecord;
use encoding_rs::Encoding;
use log::debug;
use thiserror::Error;

use crate::{error::ImportError, io_utils, printable_delimiter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{path:?} line {line}: {message}")]
pub struct SourceError {
    pub path: PathBuf,
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DelimitedReader {
    path: PathBuf,
    delimiter: u8,
    has_headers: bool,
    encoding: &'static Encoding,
    field_count: usize,
}

impl DelimitedReader {
    pub fn open(
        path: &Path,
        delimiter: u8,
        has_headers: bool,
        encoding: &'static Encoding,
    ) -> Result<Self, ImportError> {
        let first_line =
            io_utils::read_first_line(path, encoding).map_err(|source| ImportError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !first_line.contains(delimiter as char) {
            return Err(ImportError::MalformedInput {
                path: path.to_path_buf(),
                delimiter: printable_delimiter(delimiter),
            });
        }

        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter, false).map_err(
            |source| ImportError::Io {
                path: path.to_path_buf(),
                source,
            },
        )?;
        let mut record = ByteRecord::new();
        reader
            .read_byte_record(&mut record)
            .map_err(|err| source_error(path, &err))?;
        let field_count = record.len();
        debug!("{path:?}: first line splits into {field_count} field(s)");

        Ok(DelimitedReader {
            path: path.to_path_buf(),
            delimiter,
            has_headers,
            encoding,
            field_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Header cells, or `None` when the source has no header row.
    pub fn headers(&self) -> Result<Option<Vec<String>>, ImportError> {
        if !self.has_headers {
            return Ok(None);
        }
        let mut reader = self.open_reader()?;
        let record = reader
            .byte_headers()
            .map_err(|err| source_error(&self.path, &err))?
            .clone();
        let headers = io_utils::decode_record(&record, self.encoding).map_err(|message| {
            SourceError {
                path: self.path.clone(),
                line: 1,
                message,
            }
        })?;
        Ok(Some(headers))
    }

    pub fn first_data_row(&self) -> Result<Option<Vec<String>>, ImportError> {
        Ok(self.rows()?.next().transpose()?)
    }

    /// Opens a fresh pass over the data rows (the header row is skipped).
    pub fn rows(&self) -> Result<Rows, ImportError> {
        Ok(Rows {
            reader: self.open_reader()?,
            record: ByteRecord::new(),
            encoding: self.encoding,
            path: self.path.clone(),
            done: false,
        })
    }

    fn open_reader(&self) -> Result<csv::Reader<Box<dyn Read>>, ImportError> {
        io_utils::open_csv_reader_from_path(&self.path, self.delimiter, self.has_headers).map_err(
            |source| ImportError::Io {
                path: self.path.clone(),
                source,
            },
        )
    }
}

pub struct Rows {
    reader: csv::Reader<Box<dyn Read>>,
    record: ByteRecord,
    encoding: &'static Encoding,
    path: PathBuf,
    done: bool,
}

impl Iterator for Rows {
    type Item = Result<Vec<String>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                Some(
                    io_utils::decode_record(&self.record, self.encoding).map_err(|message| {
                        SourceError {
                            path: self.path.clone(),
                            line,
                            message,
                        }
                    }),
                )
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(source_error(&self.path, &err)))
            }
        }
    }
}

fn source_error(path: &Path, err: &csv::Error) -> SourceError {
    SourceError {
        path: path.to_path_buf(),
        line: err.position().map(|p| p.line()).unwrap_or(0),
        message: err.to_string(),
    }
}

/// Opens and validates every source of a run before anything else happens.
///
/// Delimiter presence is checked for all sources first; field counts are then
/// compared against the first source.
pub fn open_sources(
    paths: &[PathBuf],
    delimiter: Option<u8>,
    has_headers: bool,
    encoding: &'static Encoding,
) -> Result<Vec<DelimitedReader>, ImportError> {
    let first = paths.first().ok_or(ImportError::NoInputs)?;
    let delimiter = io_utils::resolve_input_delimiter(first, delimiter);
    let readers = paths
        .iter()
        .map(|path| DelimitedReader::open(path, delimiter, has_headers, encoding))
        .collect::<Result<Vec<_>, _>>()?;

    let expected = readers[0].field_count();
    if let Some(offender) = readers.iter().find(|r| r.field_count() != expected) {
        return Err(ImportError::SchemaMismatch {
            path: offender.path().to_path_buf(),
            first: readers[0].path().to_path_buf(),
            expected,
            found: offender.field_count(),
        });
    }
    Ok(readers)
}
