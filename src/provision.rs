use log::{debug, info, warn};

use crate::{
    destination::{Connection, Destination},
    dialect::{CreateTable, TableName},
    error::ImportError,
    schema::InferredSchema,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    Existing,
    Created { statement: String },
}

/// Makes sure the destination table exists before any file is loaded.
pub struct TableProvisioner<'a> {
    destination: &'a dyn Destination,
}

impl<'a> TableProvisioner<'a> {
    pub fn new(destination: &'a dyn Destination) -> Self {
        TableProvisioner { destination }
    }

    /// Creates `table` from `schema` when it is missing. An existing table is
    /// used as-is; its columns are not compared with the schema.
    pub fn ensure(
        &self,
        database: &str,
        table: &TableName,
        schema: &InferredSchema,
    ) -> Result<Provisioned, ImportError> {
        let mut connection = self.destination.connect()?;
        let outcome = self.ensure_on(connection.as_mut(), database, table, schema);
        if let Err(err) = connection.close() {
            warn!("Closing the provisioning connection failed: {err}");
        }
        outcome
    }

    fn ensure_on(
        &self,
        connection: &mut dyn Connection,
        database: &str,
        table: &TableName,
        schema: &InferredSchema,
    ) -> Result<Provisioned, ImportError> {
        if !connection.database_exists(database)? {
            return Err(ImportError::DestinationNotFound(database.to_string()));
        }
        if connection.table_exists(table)? {
            debug!("Table {table} already exists in '{database}'");
            return Ok(Provisioned::Existing);
        }

        let dialect = self.destination.dialect();
        let ddl = CreateTable::from_schema(table, schema, dialect);
        let statement = ddl.to_sql(dialect);
        info!("Creating table {table}: {statement}");
        connection
            .create_table(&ddl)
            .map_err(|source| ImportError::Provisioning {
                table: table.to_string(),
                source,
            })?;
        warn!(
            "Table {table} was created from types inferred from a single row; review the column types before relying on them"
        );
        Ok(Provisioned::Created { statement })
    }
}
