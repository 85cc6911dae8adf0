//! Schema model and single-row type inference.
//!
//! The [`InferredSchema`] is computed once per run from the first data row of
//! the first source and shared read-only by every file in the run. Each field
//! is classified by trying, in order:
//!
//! 1. integer (fits in an `i64`)
//! 2. decimal (finite floating point)
//! 3. datetime (date-only or date-and-time in common formats)
//! 4. text (fallback)
//!
//! Later rows never widen a column's kind. A column whose first value is `42`
//! stays an integer even if row 5000 holds `42.5`; the destination reports such
//! rows as type mismatches at load time.

use std::{fmt, fs::File, path::Path};

use anyhow::Context;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    data::{is_floating_point, parse_integer, parse_timestamp},
    error::ImportError,
    query::RowQuery,
    reader::DelimitedReader,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    Decimal,
    DateTime,
    Text,
}

impl ColumnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Decimal => "decimal",
            ColumnKind::DateTime => "datetime",
            ColumnKind::Text => "text",
        }
    }

    /// Best-effort mapping from a declared destination type name back to a kind.
    pub fn from_type_name(type_name: &str) -> Self {
        let lowered = type_name.trim().to_ascii_lowercase();
        let base = lowered.split('(').next().unwrap_or_default().trim();
        match base {
            "bigint" | "int" | "integer" | "smallint" | "tinyint" => ColumnKind::Integer,
            "decimal" | "numeric" | "float" | "real" | "double" | "money" => {
                ColumnKind::Decimal
            }
            "datetime" | "datetime2" | "date" | "timestamp" | "smalldatetime" => {
                ColumnKind::DateTime
            }
            _ => ColumnKind::Text,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub ordinal: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InferredSchema {
    pub columns: Vec<Column>,
}

impl InferredSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn kinds(&self) -> Vec<ColumnKind> {
        self.columns.iter().map(|c| c.kind).collect()
    }

    /// Narrows the schema to the columns a query emits, renumbering ordinals.
    pub fn project(&self, query: &RowQuery) -> InferredSchema {
        let columns = query
            .projection()
            .iter()
            .enumerate()
            .map(|(ordinal, &idx)| Column {
                name: self.columns[idx].name.clone(),
                kind: self.columns[idx].kind,
                ordinal,
            })
            .collect();
        InferredSchema { columns }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")?;
        Ok(())
    }
}

pub fn classify_value(value: &str) -> ColumnKind {
    let trimmed = value.trim();
    if parse_integer(trimmed).is_some() {
        ColumnKind::Integer
    } else if is_floating_point(trimmed) {
        ColumnKind::Decimal
    } else if parse_timestamp(trimmed).is_some() {
        ColumnKind::DateTime
    } else {
        ColumnKind::Text
    }
}

pub fn synthesize_column_name(ordinal: usize) -> String {
    format!("column{}", ordinal + 1)
}

/// Builds the schema from a sample row and optional header cells.
pub fn infer_from_row(headers: Option<&[String]>, sample: &[String]) -> InferredSchema {
    let columns = sample
        .iter()
        .enumerate()
        .map(|(ordinal, value)| {
            let name = headers
                .and_then(|cells| cells.get(ordinal))
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| synthesize_column_name(ordinal));
            Column {
                name,
                kind: classify_value(value),
                ordinal,
            }
        })
        .collect();
    InferredSchema { columns }
}

pub fn infer_schema(reader: &DelimitedReader) -> Result<InferredSchema, ImportError> {
    let headers = reader.headers()?;
    let sample = match reader.first_data_row()? {
        Some(row) => row,
        None => {
            warn!(
                "{:?} has no data rows; every column is inferred as text",
                reader.path()
            );
            vec![String::new(); reader.field_count()]
        }
    };
    let schema = infer_from_row(headers.as_deref(), &sample);
    debug!(
        "Inferred {} column(s) from {:?}: {:?}",
        schema.columns.len(),
        reader.path(),
        schema
            .columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.kind))
            .collect::<Vec<_>>()
    );
    Ok(schema)
}
