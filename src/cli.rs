use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::{config::LoadOptions, dialect::Dialect};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Bulk-load delimited files into a relational table",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load one or more delimited files into a destination table
    Import(ImportArgs),
    /// Infer the schema of a delimited file and print the matching CREATE TABLE
    Infer(InferArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input files; all must share the delimiter and column count
    #[arg(short = 'i', long = "input", required = true, num_args = 1.., action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Destination: `memory`, `sqlite:<path>` or a SQLite database file path
    #[arg(short, long)]
    pub target: String,
    /// Destination table, optionally schema-qualified (`dbo.orders`)
    #[arg(long)]
    pub table: Option<String>,
    /// Destination database (defaults to `main`)
    #[arg(long)]
    pub database: Option<String>,
    /// YAML file with load options; flags given here take precedence
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Write the run report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Delimiter character (supports ',', 'tab', ';', '|'); defaults by file extension
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Treat the first row of every file as column names
    #[arg(long = "headers", alias = "first-row-has-column-names")]
    pub headers: bool,
    /// Rows per batch sent to the destination
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Report progress every N copied rows (0 disables)
    #[arg(long = "notify-after")]
    pub notify_after: Option<u64>,
    /// Empty the destination table before each file is loaded
    #[arg(long = "truncate")]
    pub truncate: bool,
    /// Query applied to every row, e.g. `SELECT id, name FROM csvtable WHERE id > 10`
    #[arg(short, long)]
    pub query: Option<String>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Destination operation timeout in seconds (waits indefinitely when omitted)
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    #[command(flatten)]
    pub bulk_copy: BulkCopyFlags,
}

#[derive(Debug, Args)]
pub struct BulkCopyFlags {
    /// Enforce check and foreign-key constraints while copying
    #[arg(long = "check-constraints")]
    pub check_constraints: bool,
    /// Let insert triggers fire during the copy
    #[arg(long = "fire-triggers")]
    pub fire_triggers: bool,
    /// Keep source values for identity columns
    #[arg(long = "keep-identity")]
    pub keep_identity: bool,
    /// Store empty fields as NULL even when the column has a default
    #[arg(long = "keep-nulls")]
    pub keep_nulls: bool,
    /// Hold an exclusive lock for the duration of each file's copy
    #[arg(long = "table-lock")]
    pub table_lock: bool,
    /// Commit each batch in its own nested transaction
    #[arg(long = "use-internal-transaction")]
    pub use_internal_transaction: bool,
    /// Skip rows that collide with existing keys
    #[arg(long = "ignore-duplicates")]
    pub ignore_duplicates: bool,
}

impl ImportArgs {
    /// Options from `--config` (or defaults) with command-line flags applied.
    pub fn load_options(&self) -> Result<LoadOptions> {
        let mut options = match &self.config {
            Some(path) => LoadOptions::load(path)
                .with_context(|| format!("Loading options from {path:?}"))?,
            None => LoadOptions::default(),
        };
        if self.delimiter.is_some() {
            options.delimiter = self.delimiter;
        }
        options.first_row_has_column_names |= self.headers;
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        if let Some(notify_after) = self.notify_after {
            options.notify_after = notify_after;
        }
        options.truncate_before_load |= self.truncate;
        if let Some(query) = &self.query {
            options.query = query.clone();
        }
        if let Some(database) = &self.database {
            options.database = database.clone();
        }
        if let Some(table) = &self.table {
            options.table = table.clone();
        }
        if self.input_encoding.is_some() {
            options.input_encoding = self.input_encoding.clone();
        }
        if self.timeout_secs.is_some() {
            options.timeout_secs = self.timeout_secs;
        }

        let flags = &self.bulk_copy;
        let bulk = &mut options.bulk_copy;
        bulk.check_constraints |= flags.check_constraints;
        bulk.fire_triggers |= flags.fire_triggers;
        bulk.keep_identity |= flags.keep_identity;
        bulk.keep_nulls |= flags.keep_nulls;
        bulk.table_lock |= flags.table_lock;
        bulk.use_internal_transaction |= flags.use_internal_transaction;
        bulk.ignore_duplicates |= flags.ignore_duplicates;

        options.validate()?;
        Ok(options)
    }
}

#[derive(Debug, Args)]
pub struct InferArgs {
    /// Input file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Write the inferred schema as YAML to this path
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Type names and quoting used for the CREATE TABLE statement
    #[arg(long, value_enum, default_value_t = Dialect::SqlServer)]
    pub dialect: Dialect,
    /// Table name used in the CREATE TABLE statement
    #[arg(long, default_value = "imported")]
    pub table: String,
    /// Narrow the schema through a query, as `import --query` would
    #[arg(short, long)]
    pub query: Option<String>,
    /// Delimiter character (supports ',', 'tab', ';', '|'); defaults by file extension
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Treat the first row as column names
    #[arg(long = "headers")]
    pub headers: bool,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
