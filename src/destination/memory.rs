//! In-process destination for dry runs and tests.
//!
//! Tables live behind an `Arc<Mutex<..>>` so every connection handed out by one
//! [`MemoryDestination`] (and every clone of it) sees the same data. A
//! transaction works on a snapshot of all tables which replaces the shared copy
//! on commit and is dropped on rollback.
//!
//! Values are checked against the declared column types the way a SQL Server
//! bulk copy checks them, and rejections use the same message text.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use log::debug;

use super::{BulkCopy, Connection, Destination, DestinationColumn, DestinationError, Row};
use crate::{
    config::BulkCopyOptions,
    data::parse_typed_value,
    dialect::{CreateTable, Dialect, TableName},
    schema::ColumnKind,
};

type Tables = BTreeMap<String, MemoryTable>;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<DestinationColumn>,
    rows: Vec<Row>,
}

#[derive(Debug)]
struct Store {
    databases: BTreeSet<String>,
    tables: Tables,
    ddl: Vec<String>,
    connections_opened: usize,
    connections_open: usize,
    fail_after: Option<(u64, String)>,
    fail_truncate: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryDestination {
    dialect: Dialect,
    store: Arc<Mutex<Store>>,
}

impl MemoryDestination {
    /// An empty destination holding only the `main` database.
    pub fn new(dialect: Dialect) -> Self {
        let store = Store {
            databases: BTreeSet::from([crate::config::DEFAULT_DATABASE.to_string()]),
            tables: Tables::new(),
            ddl: Vec::new(),
            connections_opened: 0,
            connections_open: 0,
            fail_after: None,
            fail_truncate: None,
        };
        MemoryDestination {
            dialect,
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn with_database(self, name: &str) -> Self {
        self.update(|store| {
            store.databases.insert(name.to_string());
        });
        self
    }

    pub fn with_table(self, table: &TableName, columns: Vec<DestinationColumn>) -> Self {
        self.update(|store| {
            store.tables.insert(
                table_key(table),
                MemoryTable {
                    columns,
                    rows: Vec::new(),
                },
            );
        });
        self
    }

    /// Makes the next bulk copy fail with `message` once `rows` rows have been
    /// written. The failure fires once.
    pub fn fail_after(self, rows: u64, message: &str) -> Self {
        self.update(|store| store.fail_after = Some((rows, message.to_string())));
        self
    }

    pub fn fail_truncate(self, message: &str) -> Self {
        self.update(|store| store.fail_truncate = Some(message.to_string()));
        self
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &TableName) -> Vec<Row> {
        self.read(|store| {
            store
                .tables
                .get(&table_key(table))
                .map(|t| t.rows.clone())
                .unwrap_or_default()
        })
    }

    pub fn row_count(&self, table: &TableName) -> usize {
        self.read(|store| {
            store
                .tables
                .get(&table_key(table))
                .map_or(0, |t| t.rows.len())
        })
    }

    pub fn columns(&self, table: &TableName) -> Option<Vec<DestinationColumn>> {
        self.read(|store| store.tables.get(&table_key(table)).map(|t| t.columns.clone()))
    }

    pub fn executed_ddl(&self) -> Vec<String> {
        self.read(|store| store.ddl.clone())
    }

    pub fn connections_opened(&self) -> usize {
        self.read(|store| store.connections_opened)
    }

    /// Connections handed out and not yet closed.
    pub fn connections_open(&self) -> usize {
        self.read(|store| store.connections_open)
    }

    fn update(&self, f: impl FnOnce(&mut Store)) {
        let mut guard = self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }

    fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        let guard = self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }
}

impl Destination for MemoryDestination {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn connect(&self) -> Result<Box<dyn Connection>, DestinationError> {
        {
            let mut store = lock(&self.store)?;
            store.connections_opened += 1;
            store.connections_open += 1;
        }
        Ok(Box::new(MemoryConnection {
            dialect: self.dialect,
            store: Arc::clone(&self.store),
            pending: None,
        }))
    }
}

struct MemoryConnection {
    dialect: Dialect,
    store: Arc<Mutex<Store>>,
    /// Snapshot of every table while a transaction is open.
    pending: Option<Tables>,
}

impl MemoryConnection {
    /// Runs `f` against the transaction snapshot, or the shared tables when no
    /// transaction is open.
    fn with_tables<T>(
        &mut self,
        f: impl FnOnce(&mut Tables) -> Result<T, DestinationError>,
    ) -> Result<T, DestinationError> {
        match self.pending.as_mut() {
            Some(tables) => f(tables),
            None => f(&mut lock(&self.store)?.tables),
        }
    }
}

fn lock(store: &Mutex<Store>) -> Result<MutexGuard<'_, Store>, DestinationError> {
    store
        .lock()
        .map_err(|_| DestinationError::Rejected("The in-memory store is poisoned".to_string()))
}

fn table_key(table: &TableName) -> String {
    table.to_string().to_ascii_lowercase()
}

fn check_value(
    idx: usize,
    column: &DestinationColumn,
    value: Option<&str>,
) -> Result<(), DestinationError> {
    let Some(text) = value else {
        if column.nullable {
            return Ok(());
        }
        return Err(DestinationError::Rejected(format!(
            "Column '{}' does not allow DBNull.Value.",
            column.name
        )));
    };
    let kind = ColumnKind::from_type_name(&column.type_name);
    if kind != ColumnKind::Text && parse_typed_value(text, kind).is_err() {
        return Err(DestinationError::Rejected(format!(
            "The given value of type String from the data source cannot be converted to type {} of the specified target column.",
            column.type_name
        )));
    }
    if column
        .max_length
        .is_some_and(|max| text.chars().count() > max)
    {
        return Err(DestinationError::Rejected(format!(
            "Received an invalid column length from the bcp client for colid {}.",
            idx + 1
        )));
    }
    Ok(())
}

impl Connection for MemoryConnection {
    fn database_exists(&mut self, database: &str) -> Result<bool, DestinationError> {
        Ok(lock(&self.store)?.databases.contains(database))
    }

    fn table_exists(&mut self, table: &TableName) -> Result<bool, DestinationError> {
        let key = table_key(table);
        self.with_tables(|tables| Ok(tables.contains_key(&key)))
    }

    fn describe_table(
        &mut self,
        table: &TableName,
    ) -> Result<Vec<DestinationColumn>, DestinationError> {
        let key = table_key(table);
        self.with_tables(|tables| {
            tables
                .get(&key)
                .map(|t| t.columns.clone())
                .ok_or_else(|| DestinationError::MissingTable(table.to_string()))
        })
    }

    fn create_table(&mut self, ddl: &CreateTable) -> Result<(), DestinationError> {
        let key = table_key(&ddl.table);
        let statement = ddl.to_sql(self.dialect);
        self.with_tables(|tables| {
            if tables.contains_key(&key) {
                return Err(DestinationError::Rejected(format!(
                    "There is already an object named '{}' in the database.",
                    ddl.table
                )));
            }
            let columns = ddl
                .columns
                .iter()
                .map(|c| DestinationColumn::new(c.name.clone(), c.type_name.clone()))
                .collect();
            tables.insert(
                key,
                MemoryTable {
                    columns,
                    rows: Vec::new(),
                },
            );
            Ok(())
        })?;
        debug!("Executed DDL: {statement}");
        lock(&self.store)?.ddl.push(statement);
        Ok(())
    }

    fn begin(&mut self, _options: &BulkCopyOptions) -> Result<(), DestinationError> {
        let snapshot = lock(&self.store)?.tables.clone();
        self.pending = Some(snapshot);
        Ok(())
    }

    fn truncate(&mut self, table: &TableName) -> Result<(), DestinationError> {
        if let Some(message) = lock(&self.store)?.fail_truncate.take() {
            return Err(DestinationError::Rejected(message));
        }
        let key = table_key(table);
        self.with_tables(|tables| {
            let entry = tables
                .get_mut(&key)
                .ok_or_else(|| DestinationError::MissingTable(table.to_string()))?;
            entry.rows.clear();
            Ok(())
        })
    }

    fn bulk_copy(&mut self, request: BulkCopy<'_, '_>) -> Result<u64, DestinationError> {
        let BulkCopy {
            table,
            rows,
            options,
            notify_after,
            progress,
            ..
        } = request;
        let mut failure = lock(&self.store)?.fail_after.take();
        let key = table_key(table);

        self.with_tables(|tables| {
            let target = tables
                .get_mut(&key)
                .ok_or_else(|| DestinationError::MissingTable(table.to_string()))?;
            let mut copied = 0u64;
            for row in rows {
                if failure.as_ref().is_some_and(|(after, _)| copied >= *after) {
                    let message = failure.take().map(|(_, m)| m).unwrap_or_default();
                    return Err(DestinationError::Rejected(message));
                }
                let mut row = row?;
                if row.len() != target.columns.len() {
                    return Err(DestinationError::Rejected(format!(
                        "Received {} value(s) for the {} column(s) of {table}",
                        row.len(),
                        target.columns.len()
                    )));
                }
                for (idx, column) in target.columns.iter().enumerate() {
                    if row[idx].is_none() && !options.keep_nulls {
                        row[idx] = column.default.clone();
                    }
                    check_value(idx, column, row[idx].as_deref())?;
                }
                target.rows.push(row);
                copied += 1;
                if notify_after > 0 && copied % notify_after == 0 {
                    progress(copied);
                }
            }
            Ok(copied)
        })
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        let tables = self.pending.take().ok_or(DestinationError::NoTransaction)?;
        lock(&self.store)?.tables = tables;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        self.pending
            .take()
            .map(|_| ())
            .ok_or(DestinationError::NoTransaction)
    }

    fn close(self: Box<Self>) -> Result<(), DestinationError> {
        let mut store = lock(&self.store)?;
        store.connections_open = store.connections_open.saturating_sub(1);
        Ok(())
    }
}
