use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::ColumnKind;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Failed to parse '{value}' as {kind}")]
pub struct ParseValueError {
    pub value: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Parses a timestamp, accepting date-only values as midnight.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    parse_naive_datetime(value).or_else(|| {
        parse_naive_date(value).and_then(|date| date.and_hms_opt(0, 0, 0))
    })
}

pub fn parse_integer(value: &str) -> Option<i64> {
    value.parse::<i64>().ok()
}

/// Floating-point check used by inference. Non-finite spellings such as `NaN`
/// or `inf` do not count as numbers.
pub fn is_floating_point(value: &str) -> bool {
    value.parse::<f64>().is_ok_and(f64::is_finite)
}

pub fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

pub fn parse_typed_value(value: &str, kind: ColumnKind) -> Result<Option<Value>, ParseValueError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed = match kind {
        ColumnKind::Integer => parse_integer(trimmed).map(Value::Integer),
        ColumnKind::Decimal => parse_decimal(trimmed).map(Value::Decimal),
        ColumnKind::DateTime => parse_timestamp(trimmed).map(Value::DateTime),
        ColumnKind::Text => Some(Value::Text(value.to_string())),
    };
    parsed.map(Some).ok_or_else(|| ParseValueError {
        value: value.to_string(),
        kind,
    })
}
