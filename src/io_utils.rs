//! I/O utilities for delimited-file reading, decoding, and delimiter resolution.
//!
//! Every source file the importer touches is opened through this module:
//!
//! - **Delimiter resolution**: extension-based defaults (`.tsv` → tab, everything
//!   else → comma) with manual override support.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Reader construction**: `open_csv_reader_from_path` builds a strict
//!   (non-flexible) `csv::Reader` so ragged rows surface as errors.
//! - **First-line probing**: `read_first_line` returns the raw first line of a
//!   source, used to validate the delimiter before any tokenizing happens.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Option<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes()),
        None => Some(UTF_8),
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
    has_headers: bool,
) -> io::Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = Box::new(BufReader::new(File::open(path)?));
    Ok(open_csv_reader(reader, delimiter, has_headers))
}

/// Reads the first physical line of `path` without tokenizing it.
///
/// The line terminator (`\n` or `\r\n`) is stripped. An empty file yields an
/// empty string.
pub fn read_first_line(path: &Path, encoding: &'static Encoding) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut raw = Vec::new();
    reader.read_until(b'\n', &mut raw)?;
    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    decode_bytes(&raw, encoding)
        .map_err(|message| io::Error::new(io::ErrorKind::InvalidData, message))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String, String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Result<Vec<String>, String> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}
