//! Identifier quoting, kind-to-type mapping, and DDL text per destination flavour.

use std::fmt;

use clap::ValueEnum;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::schema::{ColumnKind, InferredSchema};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    SqlServer,
    Sqlite,
}

impl Dialect {
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Conservative destination type for an inferred kind.
    pub fn type_name(self, kind: ColumnKind) -> &'static str {
        match (self, kind) {
            (Dialect::SqlServer, ColumnKind::Integer) => "bigint",
            (Dialect::SqlServer, ColumnKind::Decimal) => "decimal(38, 10)",
            (Dialect::SqlServer, ColumnKind::DateTime) => "datetime2",
            (Dialect::SqlServer, ColumnKind::Text) => "varchar(MAX)",
            (Dialect::Sqlite, ColumnKind::Integer) => "INTEGER",
            (Dialect::Sqlite, ColumnKind::Decimal) => "NUMERIC",
            (Dialect::Sqlite, ColumnKind::DateTime) => "TIMESTAMP",
            (Dialect::Sqlite, ColumnKind::Text) => "TEXT",
        }
    }

    pub fn qualify(self, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&table.name)
            ),
            None => self.quote_identifier(&table.name),
        }
    }
}

/// A destination table, optionally qualified by schema (`dbo.people`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        TableName {
            schema: None,
            name: name.into(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().split_once('.') {
            Some((schema, name)) => TableName {
                schema: Some(unquote_identifier(schema)),
                name: unquote_identifier(name),
            },
            None => TableName::new(unquote_identifier(value)),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Strips one level of `[...]` or `"..."` quoting.
pub fn unquote_identifier(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        return inner.replace("]]", "]");
    }
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed[1..trimmed.len() - 1].replace("\"\"", "\"");
    }
    trimmed.to_string()
}

/// Declared character length of a type such as `varchar(20)`.
///
/// `MAX`, non-character types and undeclared lengths yield `None`.
pub fn declared_length(type_name: &str) -> Option<usize> {
    let lowered = type_name.trim().to_ascii_lowercase();
    let (base, rest) = lowered.split_once('(')?;
    if !matches!(
        base.trim(),
        "char" | "varchar" | "nchar" | "nvarchar" | "character" | "varying character"
    ) {
        return None;
    }
    rest.trim_end_matches(')').trim().parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub table: TableName,
    pub columns: Vec<ColumnDefinition>,
}

impl CreateTable {
    pub fn from_schema(table: &TableName, schema: &InferredSchema, dialect: Dialect) -> Self {
        let columns = schema
            .columns
            .iter()
            .map(|column| ColumnDefinition {
                name: column.name.clone(),
                type_name: dialect.type_name(column.kind).to_string(),
            })
            .collect();
        CreateTable {
            table: table.clone(),
            columns,
        }
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", dialect.quote_identifier(&c.name), c.type_name))
            .join(", ");
        format!("CREATE TABLE {} ({columns})", dialect.qualify(&self.table))
    }
}
