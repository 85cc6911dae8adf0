//! The query/filter expression applied to every source row before it is copied.
//!
//! Sources are addressed through the placeholder table `csvtable`:
//!
//! ```text
//! SELECT * FROM csvtable
//! SELECT id, [full name] FROM csvtable WHERE amount >= 100 AND status = 'shipped'
//! ```
//!
//! Only projection and a conjunction of column comparisons are supported;
//! comparisons are typed by the inferred column kind.

use std::cmp::Ordering;

use thiserror::Error;

use crate::{
    data::{Value, parse_typed_value},
    dialect::unquote_identifier,
    schema::{ColumnKind, InferredSchema},
};

pub const SOURCE_PLACEHOLDER: &str = "csvtable";
pub const DEFAULT_QUERY: &str = "SELECT * FROM csvtable";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Query must look like `SELECT <columns> FROM csvtable [WHERE ...]`, got '{0}'")]
    Shape(String),
    #[error("Query reads from '{0}' but the source is addressed as 'csvtable'")]
    UnknownTable(String),
    #[error("Column '{0}' does not exist in the source")]
    UnknownColumn(String),
    #[error("Failed to parse condition '{0}'")]
    Condition(String),
    #[error("Cannot compare column '{column}' ({kind}) with '{value}'")]
    Operand {
        column: String,
        kind: ColumnKind,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
struct Condition {
    column: usize,
    kind: ColumnKind,
    operator: ComparisonOperator,
    raw_value: String,
    operand: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RowQuery {
    projection: Vec<usize>,
    conditions: Vec<Condition>,
    identity: bool,
}

impl RowQuery {
    pub fn compile(text: &str, schema: &InferredSchema) -> Result<Self, QueryError> {
        let normalized = text
            .replace(['\n', '\r', '\t'], " ")
            .trim()
            .trim_end_matches(';')
            .trim()
            .to_string();
        let shape_error = || QueryError::Shape(text.trim().to_string());

        if !normalized.to_ascii_lowercase().starts_with("select ") {
            return Err(shape_error());
        }
        let body = &normalized["select ".len()..];
        let from_idx = find_keyword(body, " from ").ok_or_else(shape_error)?;
        let projection_text = body[..from_idx].trim();
        let rest = &body[from_idx + " from ".len()..];
        let (table_text, where_text) = match find_keyword(rest, " where ") {
            Some(idx) => (&rest[..idx], Some(&rest[idx + " where ".len()..])),
            None => (rest, None),
        };

        let table = unquote_identifier(table_text);
        if !table.eq_ignore_ascii_case(SOURCE_PLACEHOLDER) {
            return Err(QueryError::UnknownTable(table));
        }

        let projection = if projection_text == "*" {
            (0..schema.columns.len()).collect::<Vec<_>>()
        } else {
            split_keyword(projection_text, ",")
                .into_iter()
                .map(|name| resolve_column(schema, name))
                .collect::<Result<Vec<_>, _>>()?
        };
        if projection.is_empty() {
            return Err(shape_error());
        }

        let conditions = match where_text {
            Some(clause) => split_keyword(clause, " and ")
                .into_iter()
                .map(|condition| parse_condition(condition, schema))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let identity = projection.len() == schema.columns.len()
            && projection.iter().enumerate().all(|(pos, &idx)| pos == idx);
        Ok(RowQuery {
            projection,
            conditions,
            identity,
        })
    }

    /// Source column indices emitted, in output order.
    pub fn projection(&self) -> &[usize] {
        &self.projection
    }

    pub fn matches(&self, row: &[String]) -> bool {
        self.conditions
            .iter()
            .all(|condition| evaluate_condition(condition, row))
    }

    /// Filters and projects one row; `None` when the row is filtered out.
    pub fn apply(&self, row: Vec<String>) -> Option<Vec<String>> {
        if !self.matches(&row) {
            return None;
        }
        if self.identity {
            return Some(row);
        }
        Some(
            self.projection
                .iter()
                .map(|&idx| row.get(idx).cloned().unwrap_or_default())
                .collect(),
        )
    }
}

fn resolve_column(schema: &InferredSchema, raw: &str) -> Result<usize, QueryError> {
    let name = unquote_identifier(raw);
    schema
        .column_index(&name)
        .ok_or(QueryError::UnknownColumn(name))
}

fn parse_condition(text: &str, schema: &InferredSchema) -> Result<Condition, QueryError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(QueryError::Condition(text.to_string()));
    }

    let (column_text, operator, value_text) = split_condition(trimmed)
        .ok_or_else(|| QueryError::Condition(trimmed.to_string()))?;
    let column = resolve_column(schema, column_text)?;
    let kind = schema.columns[column].kind;
    let raw_value = unquote(value_text.trim()).to_string();

    let operand = match operator {
        ComparisonOperator::Contains
        | ComparisonOperator::StartsWith
        | ComparisonOperator::EndsWith => None,
        _ => parse_typed_value(&raw_value, kind).map_err(|_| QueryError::Operand {
            column: schema.columns[column].name.clone(),
            kind,
            value: raw_value.clone(),
        })?,
    };

    Ok(Condition {
        column,
        kind,
        operator,
        raw_value,
        operand,
    })
}

fn split_condition(text: &str) -> Option<(&str, ComparisonOperator, &str)> {
    for (needle, op) in [
        (" contains ", ComparisonOperator::Contains),
        (" startswith ", ComparisonOperator::StartsWith),
        (" endswith ", ComparisonOperator::EndsWith),
    ] {
        if let Some(idx) = find_keyword(text, needle) {
            return Some((&text[..idx], op, &text[idx + needle.len()..]));
        }
    }

    for (needle, op) in [
        ("!=", ComparisonOperator::NotEq),
        ("<>", ComparisonOperator::NotEq),
        (">=", ComparisonOperator::Ge),
        ("<=", ComparisonOperator::Le),
        ("=", ComparisonOperator::Eq),
        (">", ComparisonOperator::Gt),
        ("<", ComparisonOperator::Lt),
    ] {
        if let Some(idx) = find_keyword(text, needle) {
            return Some((&text[..idx], op, &text[idx + needle.len()..]));
        }
    }
    None
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Byte offset of the first case-insensitive `keyword` outside quotes and brackets.
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    let haystack = text.to_ascii_lowercase();
    let bytes = haystack.as_bytes();
    let needle = keyword.as_bytes();
    let mut closing: Option<u8> = None;
    for idx in 0..bytes.len() {
        let byte = bytes[idx];
        match closing {
            Some(close) => {
                if byte == close {
                    closing = None;
                }
            }
            None => match byte {
                b'\'' | b'"' => closing = Some(byte),
                b'[' => closing = Some(b']'),
                _ if bytes[idx..].starts_with(needle) => return Some(idx),
                _ => {}
            },
        }
    }
    None
}

fn split_keyword<'a>(text: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(idx) = find_keyword(rest, keyword) {
        parts.push(rest[..idx].trim());
        rest = &rest[idx + keyword.len()..];
    }
    parts.push(rest.trim());
    parts.retain(|part| !part.is_empty());
    parts
}

fn evaluate_condition(condition: &Condition, row: &[String]) -> bool {
    use ComparisonOperator::*;

    let raw = row.get(condition.column).map(String::as_str).unwrap_or("");
    match condition.operator {
        Contains => raw.contains(condition.raw_value.as_str()),
        StartsWith => raw.starts_with(condition.raw_value.as_str()),
        EndsWith => raw.ends_with(condition.raw_value.as_str()),
        Eq | NotEq | Gt | Ge | Lt | Le => {
            let left = match parse_typed_value(raw, condition.kind) {
                Ok(value) => value,
                Err(_) => return condition.operator == NotEq,
            };
            match (left, condition.operand.as_ref()) {
                (Some(left), Some(right)) => match left.partial_cmp(right) {
                    Some(ordering) => ordering_satisfies(condition.operator, ordering),
                    None => condition.operator == NotEq,
                },
                (None, None) => matches!(condition.operator, Eq | Ge | Le),
                (None, Some(_)) | (Some(_), None) => condition.operator == NotEq,
            }
        }
    }
}

fn ordering_satisfies(operator: ComparisonOperator, ordering: Ordering) -> bool {
    match operator {
        ComparisonOperator::Eq => ordering == Ordering::Equal,
        ComparisonOperator::NotEq => ordering != Ordering::Equal,
        ComparisonOperator::Gt => ordering == Ordering::Greater,
        ComparisonOperator::Ge => ordering != Ordering::Less,
        ComparisonOperator::Lt => ordering == Ordering::Less,
        ComparisonOperator::Le => ordering != Ordering::Greater,
        ComparisonOperator::Contains
        | ComparisonOperator::StartsWith
        | ComparisonOperator::EndsWith => false,
    }
}
