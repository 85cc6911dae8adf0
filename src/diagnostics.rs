//! Turns destination failures into actionable [`LoadError`]s.
//!
//! Destinations report problems as free text. The text is matched against a
//! small table of known signatures (case-insensitive) and the matching class
//! decides which extra context is gathered: the failing column for length
//! overflows, the source/destination column layout for type mismatches.

use std::{fmt, sync::OnceLock};

use log::{debug, warn};
use regex::Regex;

use crate::{
    destination::{Destination, DestinationColumn, DestinationError},
    dialect::TableName,
    error::LoadError,
    table::render_table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    ColumnLength,
    TypeMismatch,
    Syntax,
    Generic,
}

struct Signature {
    class: FailureClass,
    pattern: Regex,
}

const SIGNATURES: &[(FailureClass, &str)] = &[
    (
        FailureClass::ColumnLength,
        r"(?i)invalid column length from the bcp client for colid (\d+)",
    ),
    (FailureClass::ColumnLength, r"(?i)would be truncated"),
    (FailureClass::TypeMismatch, r"(?i)cannot be converted to type"),
    (FailureClass::TypeMismatch, r"(?i)does not allow DBNull"),
    (FailureClass::TypeMismatch, r"(?i)NOT NULL constraint failed"),
    (FailureClass::TypeMismatch, r"(?i)datatype mismatch"),
    (FailureClass::TypeMismatch, r"(?i)cannot store \w+ value in \w+ column"),
    (FailureClass::TypeMismatch, r"(?i)conversion failed"),
    (FailureClass::Syntax, r"(?i)syntax error"),
    (FailureClass::Syntax, r"(?i)incorrect syntax"),
    (
        FailureClass::Syntax,
        r"(?i)no value given for one or more required parameters",
    ),
    (FailureClass::Syntax, r"(?i)must declare the scalar variable"),
    (FailureClass::Syntax, r"(?i)\bparameter"),
];

fn signatures() -> &'static [Signature] {
    static COMPILED: OnceLock<Vec<Signature>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        SIGNATURES
            .iter()
            .filter_map(|(class, pattern)| {
                Regex::new(pattern).ok().map(|pattern| Signature {
                    class: *class,
                    pattern,
                })
            })
            .collect()
    })
}

/// Classifies a failure message; for length overflows also returns the
/// 1-based column ordinal when the message carries one.
pub fn classify(message: &str) -> (FailureClass, Option<usize>) {
    for signature in signatures() {
        if let Some(captures) = signature.pattern.captures(message) {
            let ordinal = captures.get(1).and_then(|m| m.as_str().parse().ok());
            return (signature.class, ordinal);
        }
    }
    (FailureClass::Generic, None)
}

/// Source column order next to the destination's, rendered as a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnComparison {
    pub source: Vec<String>,
    pub destination: Vec<DestinationColumn>,
}

impl ColumnComparison {
    pub fn mismatched_positions(&self) -> Vec<usize> {
        let width = self.source.len().max(self.destination.len());
        (0..width)
            .filter(|&idx| {
                match (self.source.get(idx), self.destination.get(idx)) {
                    (Some(source), Some(destination)) => {
                        !source.eq_ignore_ascii_case(&destination.name)
                    }
                    _ => true,
                }
            })
            .collect()
    }
}

impl fmt::Display for ColumnComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.destination.is_empty() {
            return write!(
                f,
                "(destination columns unavailable) source columns: {}",
                self.source.join(", ")
            );
        }
        let mismatched = self.mismatched_positions();
        let headers = ["#", "source column", "destination column", "destination type", ""]
            .map(String::from);
        let width = self.source.len().max(self.destination.len());
        let rows = (0..width)
            .map(|idx| {
                let destination = self.destination.get(idx);
                vec![
                    (idx + 1).to_string(),
                    self.source.get(idx).cloned().unwrap_or_else(|| "-".into()),
                    destination.map_or_else(|| "-".into(), |c| c.name.clone()),
                    destination.map_or_else(|| "-".into(), |c| {
                        if c.nullable {
                            c.type_name.clone()
                        } else {
                            format!("{} not null", c.type_name)
                        }
                    }),
                    if mismatched.contains(&idx) { "<-".into() } else { String::new() },
                ]
            })
            .collect::<Vec<_>>();
        f.write_str(render_table(&headers, &rows).trim_end())
    }
}

/// Builds the [`LoadError`] for a failed file.
///
/// `last_progress` is the last copied-row count reported before the failure;
/// it is the best available row offset. Destination metadata is fetched over a
/// fresh connection only when the failure class needs it.
pub fn diagnose(
    error: DestinationError,
    last_progress: u64,
    source_columns: &[String],
    destination: &dyn Destination,
    table: &TableName,
) -> LoadError {
    let message = match error {
        DestinationError::Source(source) => return LoadError::SourceRead(source),
        other => other.to_string(),
    };
    let (class, ordinal) = classify(&message);
    debug!("Classified load failure as {class:?}: {message}");
    match class {
        FailureClass::Syntax => LoadError::Syntax { message },
        FailureClass::ColumnLength => {
            let column = ordinal
                .and_then(|ordinal| ordinal.checked_sub(1))
                .and_then(|idx| {
                    describe_destination(destination, table)
                        .and_then(|columns| columns.into_iter().nth(idx))
                });
            LoadError::ColumnOverflow {
                column: column
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), |c| c.name.clone()),
                max_length: column.and_then(|c| c.max_length),
                after_row: last_progress,
                message,
            }
        }
        FailureClass::TypeMismatch => LoadError::TypeMismatch {
            message,
            comparison: ColumnComparison {
                source: source_columns.to_vec(),
                destination: describe_destination(destination, table).unwrap_or_default(),
            },
        },
        FailureClass::Generic => LoadError::Generic(message),
    }
}

fn describe_destination(
    destination: &dyn Destination,
    table: &TableName,
) -> Option<Vec<DestinationColumn>> {
    let described = destination.connect().and_then(|mut connection| {
        let columns = connection.describe_table(table);
        if let Err(err) = connection.close() {
            warn!("Closing the diagnostics connection failed: {err}");
        }
        columns
    });
    match described {
        Ok(columns) => Some(columns),
        Err(err) => {
            warn!("Could not describe {table} for diagnostics: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{destination::memory::MemoryDestination, dialect::Dialect, reader::SourceError};
    use std::path::PathBuf;

    fn destination() -> (MemoryDestination, TableName) {
        let table = TableName::new("people");
        let destination = MemoryDestination::new(Dialect::SqlServer).with_table(
            &table,
            vec![
                DestinationColumn::new("id", "bigint").not_null(),
                DestinationColumn::new("name", "varchar(10)"),
            ],
        );
        (destination, table)
    }

    #[test]
    fn classify_recognises_known_signatures() {
        assert_eq!(
            classify("Received an invalid column length from the bcp client for colid 6."),
            (FailureClass::ColumnLength, Some(6))
        );
        assert_eq!(
            classify("String or binary data would be truncated."),
            (FailureClass::ColumnLength, None)
        );
        assert_eq!(
            classify("NOT NULL constraint failed: people.id").0,
            FailureClass::TypeMismatch
        );
        assert_eq!(
            classify("cannot store TEXT value in INTEGER column people.id").0,
            FailureClass::TypeMismatch
        );
        assert_eq!(
            classify("Conversion failed when converting date").0,
            FailureClass::TypeMismatch
        );
        assert_eq!(
            classify("near \"FORM\": syntax error").0,
            FailureClass::Syntax
        );
        assert_eq!(
            classify("Must declare the scalar variable \"@x\".").0,
            FailureClass::Syntax
        );
        assert_eq!(classify("disk I/O error").0, FailureClass::Generic);
    }

    #[test]
    fn overflow_names_the_column_and_progress_offset() {
        let (destination, table) = destination();
        let error = DestinationError::Rejected(
            "Received an invalid column length from the bcp client for colid 2.".into(),
        );
        match diagnose(error, 300, &[], &destination, &table) {
            LoadError::ColumnOverflow {
                column,
                max_length,
                after_row,
                ..
            } => {
                assert_eq!(column, "name");
                assert_eq!(max_length, Some(10));
                assert_eq!(after_row, 300);
            }
            other => panic!("unexpected diagnosis: {other:?}"),
        }
    }

    #[test]
    fn type_mismatch_carries_column_comparison() {
        let (destination, table) = destination();
        let error = DestinationError::Rejected("Column 'id' does not allow DBNull.Value.".into());
        let source = vec!["name".to_string(), "id".to_string()];
        let diagnosis = diagnose(error, 0, &source, &destination, &table);
        let LoadError::TypeMismatch { comparison, .. } = &diagnosis else {
            panic!("unexpected diagnosis: {diagnosis:?}");
        };
        assert_eq!(comparison.mismatched_positions(), vec![0, 1]);
        let rendered = diagnosis.to_string();
        assert!(rendered.contains("destination column"));
        assert!(rendered.contains("bigint not null"));
    }

    #[test]
    fn source_errors_pass_through() {
        let (destination, table) = destination();
        let error = DestinationError::Source(SourceError {
            path: PathBuf::from("a.csv"),
            line: 7,
            message: "found record with 2 fields".into(),
        });
        assert!(matches!(
            diagnose(error, 0, &[], &destination, &table),
            LoadError::SourceRead(SourceError { line: 7, .. })
        ));
    }

    #[test]
    fn unknown_messages_are_generic() {
        let (destination, table) = destination();
        let error = DestinationError::Rejected("deadlock victim".into());
        let diagnosis = diagnose(error, 0, &[], &destination, &table);
        assert_eq!(diagnosis.to_string(), "deadlock victim");
    }
}
