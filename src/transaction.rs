//! One file's load as a single atomic unit.
//!
//! ```text
//! Opened ──► (Truncated) ──► Loading ──► Committed
//!                                  └───► RolledBack
//! ```
//!
//! Dropping a transaction that never reached a terminal state rolls it back,
//! and the connection is closed on every path. Errors raised while rolling back
//! or closing are logged and swallowed so they never mask the load error.

use log::{debug, warn};

use crate::{
    config::LoadOptions,
    destination::{BulkCopy, Connection, Destination, DestinationError, RowStream},
    dialect::TableName,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Opened,
    Truncated,
    Loading,
    Committed,
    RolledBack,
}

/// A failed load together with the last progress count reported before it.
#[derive(Debug)]
pub struct LoadFailure {
    pub error: DestinationError,
    pub last_progress: u64,
}

pub struct BulkLoadTransaction<'a> {
    connection: Option<Box<dyn Connection>>,
    table: &'a TableName,
    options: &'a LoadOptions,
    state: TransactionState,
}

impl<'a> BulkLoadTransaction<'a> {
    /// Connects and begins a transaction.
    pub fn open(
        destination: &dyn Destination,
        table: &'a TableName,
        options: &'a LoadOptions,
    ) -> Result<Self, DestinationError> {
        let mut connection = destination.connect()?;
        if let Err(err) = connection.begin(&options.bulk_copy) {
            close_quietly(connection);
            return Err(err);
        }
        debug!("Transaction opened on {} for {table}", destination.describe());
        Ok(BulkLoadTransaction {
            connection: Some(connection),
            table,
            options,
            state: TransactionState::Opened,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Empties the table inside the transaction. A failure is only a warning;
    /// the load goes on with whatever rows the table holds.
    pub fn truncate(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        match connection.truncate(self.table) {
            Ok(()) => {
                debug!("Truncated {}", self.table);
                self.state = TransactionState::Truncated;
            }
            Err(err) => warn!("Truncating {} failed, loading anyway: {err}", self.table),
        }
    }

    /// Streams `rows` into the table and commits. Any failure (including the
    /// commit itself) rolls the transaction back.
    pub fn load(
        &mut self,
        rows: &mut RowStream<'_>,
        progress: &mut dyn FnMut(u64),
    ) -> Result<u64, LoadFailure> {
        self.state = TransactionState::Loading;
        let Some(connection) = self.connection.as_mut() else {
            return Err(LoadFailure {
                error: DestinationError::NoTransaction,
                last_progress: 0,
            });
        };

        let mut last_progress = 0u64;
        let copied = {
            let mut notify = |copied: u64| {
                last_progress = copied;
                progress(copied);
            };
            connection.bulk_copy(BulkCopy {
                table: self.table,
                rows,
                options: &self.options.bulk_copy,
                batch_size: self.options.batch_size,
                notify_after: self.options.notify_after,
                progress: &mut notify,
            })
        };
        let outcome = copied.and_then(|count| connection.commit().map(|()| count));

        match outcome {
            Ok(count) => {
                self.state = TransactionState::Committed;
                Ok(count)
            }
            Err(error) => {
                self.rollback();
                Err(LoadFailure {
                    error,
                    last_progress,
                })
            }
        }
    }

    fn rollback(&mut self) {
        if matches!(
            self.state,
            TransactionState::Committed | TransactionState::RolledBack
        ) {
            return;
        }
        if let Some(connection) = self.connection.as_mut() {
            if let Err(err) = connection.rollback() {
                warn!("Rolling back the load into {} failed: {err}", self.table);
            }
        }
        self.state = TransactionState::RolledBack;
    }
}

impl Drop for BulkLoadTransaction<'_> {
    fn drop(&mut self) {
        self.rollback();
        if let Some(connection) = self.connection.take() {
            close_quietly(connection);
        }
    }
}

fn close_quietly(connection: Box<dyn Connection>) {
    if let Err(err) = connection.close() {
        warn!("Closing the destination connection failed: {err}");
    }
}
