//! SQLite destination backed by `rusqlite`.
//!
//! The logical database name maps to a SQLite schema name (`main` unless other
//! files are attached), and a table qualified as `schema.table` is looked up in
//! that schema. Bulk copies are plain prepared `INSERT` statements executed
//! inside the transaction opened by [`Connection::begin`].

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, warn};
use rusqlite::{params, params_from_iter, types::Value};

use super::{BulkCopy, Connection, Destination, DestinationColumn, DestinationError};
use crate::{
    config::BulkCopyOptions,
    dialect::{CreateTable, Dialect, TableName, declared_length},
};

const DEFAULT_SCHEMA: &str = "main";
const BATCH_SAVEPOINT: &str = "bulk_copy_batch";
/// Largest busy timeout SQLite accepts (milliseconds held in an `i32`).
pub const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);
const BUSY_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Busy handler used when no timeout is configured: keep retrying until the
/// lock is released.
fn wait_while_busy(_attempts: i32) -> bool {
    std::thread::sleep(BUSY_RETRY_INTERVAL);
    true
}

#[derive(Debug, Clone)]
pub struct SqliteDestination {
    path: PathBuf,
    timeout: Option<Duration>,
}

impl SqliteDestination {
    pub fn new(path: PathBuf, timeout: Option<Duration>) -> Self {
        SqliteDestination { path, timeout }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Destination for SqliteDestination {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self) -> Result<Box<dyn Connection>, DestinationError> {
        let connection = rusqlite::Connection::open(&self.path)?;
        match self.timeout {
            Some(timeout) => connection.busy_timeout(timeout.min(MAX_BUSY_TIMEOUT))?,
            None => connection.busy_handler(Some(wait_while_busy))?,
        }
        debug!("Opened SQLite connection to {:?}", self.path);
        Ok(Box::new(SqliteConnection {
            connection,
            in_transaction: false,
        }))
    }
}

struct SqliteConnection {
    connection: rusqlite::Connection,
    in_transaction: bool,
}

#[derive(Debug)]
struct TableColumn {
    column: DestinationColumn,
    primary_key: bool,
}

impl SqliteConnection {
    fn columns(&self, table: &TableName) -> Result<Vec<TableColumn>, DestinationError> {
        let mut statement = self.connection.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
        )?;
        let columns = statement
            .query_map(params![table.name, schema_of(table)], |row| {
                let type_name: String = row.get(1)?;
                Ok(TableColumn {
                    column: DestinationColumn {
                        name: row.get(0)?,
                        max_length: declared_length(&type_name),
                        type_name,
                        nullable: row.get::<_, i64>(2)? == 0,
                        default: row.get(3)?,
                    },
                    primary_key: row.get::<_, i64>(4)? > 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(DestinationError::MissingTable(table.to_string()));
        }
        Ok(columns)
    }

    fn has_triggers(&self, table: &TableName) -> Result<bool, DestinationError> {
        let sql = format!(
            "SELECT count(*) FROM {}.sqlite_master WHERE type = 'trigger' AND tbl_name = ?1",
            Dialect::Sqlite.quote_identifier(schema_of(table))
        );
        let count: i64 = self
            .connection
            .query_row(&sql, [&table.name], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Values substituted for empty fields: the evaluated column default, or NULL.
    fn fill_values(
        &self,
        columns: &[TableColumn],
        options: &BulkCopyOptions,
    ) -> Result<Vec<Value>, DestinationError> {
        columns
            .iter()
            .map(|c| match (&c.column.default, options.keep_nulls) {
                (Some(expression), false) => Ok(self.connection.query_row(
                    &format!("SELECT {expression}"),
                    [],
                    |row| row.get::<_, Value>(0),
                )?),
                _ => Ok(Value::Null),
            })
            .collect()
    }
}

fn schema_of(table: &TableName) -> &str {
    table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
}

/// Index of the rowid alias column, which SQLite assigns itself when given NULL.
fn identity_column(columns: &[TableColumn]) -> Option<usize> {
    let mut keys = columns.iter().enumerate().filter(|(_, c)| c.primary_key);
    match (keys.next(), keys.next()) {
        (Some((idx, column)), None) if column.column.type_name.eq_ignore_ascii_case("integer") => {
            Some(idx)
        }
        _ => None,
    }
}

fn insert_statement(table: &TableName, column_count: usize, options: &BulkCopyOptions) -> String {
    let placeholders = (1..=column_count)
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    let conflict = if options.ignore_duplicates {
        " ON CONFLICT DO NOTHING"
    } else {
        ""
    };
    format!(
        "INSERT INTO {} VALUES ({placeholders}){conflict}",
        Dialect::Sqlite.qualify(table)
    )
}

impl Connection for SqliteConnection {
    fn database_exists(&mut self, database: &str) -> Result<bool, DestinationError> {
        let count: i64 = self.connection.query_row(
            "SELECT count(*) FROM pragma_database_list WHERE name = ?1",
            [database],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn table_exists(&mut self, table: &TableName) -> Result<bool, DestinationError> {
        let sql = format!(
            "SELECT count(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            Dialect::Sqlite.quote_identifier(schema_of(table))
        );
        let count: i64 = self
            .connection
            .query_row(&sql, [&table.name], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn describe_table(
        &mut self,
        table: &TableName,
    ) -> Result<Vec<DestinationColumn>, DestinationError> {
        Ok(self
            .columns(table)?
            .into_iter()
            .map(|c| c.column)
            .collect())
    }

    fn create_table(&mut self, ddl: &CreateTable) -> Result<(), DestinationError> {
        self.connection.execute_batch(&ddl.to_sql(Dialect::Sqlite))?;
        Ok(())
    }

    fn begin(&mut self, options: &BulkCopyOptions) -> Result<(), DestinationError> {
        // Both pragmas are no-ops inside a transaction.
        self.connection
            .pragma_update(None, "foreign_keys", options.check_constraints)?;
        self.connection
            .pragma_update(None, "ignore_check_constraints", !options.check_constraints)?;
        let begin = if options.table_lock {
            "BEGIN EXCLUSIVE"
        } else {
            "BEGIN DEFERRED"
        };
        self.connection.execute_batch(begin)?;
        self.in_transaction = true;
        Ok(())
    }

    fn truncate(&mut self, table: &TableName) -> Result<(), DestinationError> {
        let removed = self
            .connection
            .execute(&format!("DELETE FROM {}", Dialect::Sqlite.qualify(table)), [])?;
        debug!("Removed {removed} existing row(s) from {table}");
        Ok(())
    }

    fn bulk_copy(&mut self, request: BulkCopy<'_, '_>) -> Result<u64, DestinationError> {
        let BulkCopy {
            table,
            rows,
            options,
            batch_size,
            notify_after,
            progress,
        } = request;

        let columns = self.columns(table)?;
        if !options.fire_triggers && self.has_triggers(table)? {
            warn!("SQLite cannot suspend triggers; triggers on {table} will fire during the copy");
        }
        let identity = if options.keep_identity {
            None
        } else {
            identity_column(&columns)
        };
        let fill = self.fill_values(&columns, options)?;

        let mut statement = self
            .connection
            .prepare_cached(&insert_statement(table, columns.len(), options))?;
        let mut copied = 0u64;
        let mut in_batch = 0usize;
        for row in rows {
            let row = row?;
            if row.len() != columns.len() {
                return Err(DestinationError::Rejected(format!(
                    "Received {} value(s) for the {} column(s) of {table}",
                    row.len(),
                    columns.len()
                )));
            }
            if options.use_internal_transaction && in_batch == 0 {
                self.connection
                    .execute_batch(&format!("SAVEPOINT {BATCH_SAVEPOINT}"))?;
            }

            let mut values = Vec::with_capacity(row.len());
            for (idx, field) in row.into_iter().enumerate() {
                let value = match field {
                    _ if identity == Some(idx) => Value::Null,
                    None => fill[idx].clone(),
                    Some(text) => {
                        let max_length = columns[idx].column.max_length;
                        if max_length.is_some_and(|max| text.chars().count() > max) {
                            return Err(DestinationError::Rejected(format!(
                                "Received an invalid column length from the bcp client for colid {}.",
                                idx + 1
                            )));
                        }
                        Value::Text(text)
                    }
                };
                values.push(value);
            }

            let changed = statement.execute(params_from_iter(values))?;
            if changed > 0 {
                copied += changed as u64;
                if notify_after > 0 && copied % notify_after == 0 {
                    progress(copied);
                }
            }

            in_batch += 1;
            if options.use_internal_transaction && batch_size > 0 && in_batch >= batch_size {
                self.connection
                    .execute_batch(&format!("RELEASE {BATCH_SAVEPOINT}"))?;
                in_batch = 0;
            }
        }
        if options.use_internal_transaction && in_batch > 0 {
            self.connection
                .execute_batch(&format!("RELEASE {BATCH_SAVEPOINT}"))?;
        }
        Ok(copied)
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        if !self.in_transaction {
            return Err(DestinationError::NoTransaction);
        }
        self.connection.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        if !self.in_transaction {
            return Err(DestinationError::NoTransaction);
        }
        self.in_transaction = false;
        self.connection.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), DestinationError> {
        self.connection.close().map_err(|(_, err)| err.into())
    }
}
