//! Core traits for the migration engine.
//!
//! - [`SourceReader`]: introspects the source catalog and streams filtered rows
//! - [`TargetWriter`]: writes rows and routine definitions to the destination
//!
//! The engine only talks to these traits, so it runs unchanged against the
//! MySQL drivers and against in-memory doubles in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

use super::filter::RowFilter;
use super::schema::{RoutineDescriptor, SchemaSnapshot, TableDescriptor};
use super::value::Batch;

/// Options for reading rows from a table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Table to read; columns are read in descriptor order.
    pub table: TableDescriptor,
    /// Row selection.
    pub filter: RowFilter,
    /// Rows per batch.
    pub batch_size: usize,
}

/// Read-only access to the source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// List user databases, excluding system schemas.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Read every base table of a database with its columns, primary key and
    /// declared foreign keys. Tables are sorted by name.
    async fn introspect(&self, database: &str) -> Result<SchemaSnapshot>;

    /// List stored procedures and functions, ordered by kind then name.
    async fn list_routines(&self, database: &str) -> Result<Vec<RoutineDescriptor>>;

    /// Fetch the `CREATE PROCEDURE|FUNCTION` statement for a routine.
    async fn routine_definition(&self, database: &str, routine: &RoutineDescriptor)
        -> Result<String>;

    /// Count the rows a filter selects.
    async fn count_rows(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<i64>;

    /// Stream the selected rows in batches.
    ///
    /// Reading runs in a spawned task feeding a bounded channel; a read error is
    /// delivered as the last item.
    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>>;

    /// Check the connection.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// Write access to the destination database.
///
/// Implementations route every call through one session so the
/// `FOREIGN_KEY_CHECKS` session variable applies to all writes.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Column names of a destination table, or `None` if the table (or its
    /// database) does not exist.
    async fn table_columns(&self, database: &str, table: &str) -> Result<Option<Vec<String>>>;

    /// Toggle `FOREIGN_KEY_CHECKS` on the write session.
    async fn set_foreign_key_checks(&self, enabled: bool) -> Result<()>;

    /// Insert rows with `INSERT IGNORE`, returning the number of rows the
    /// server reported as inserted.
    async fn insert_ignore(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        batch: Batch,
    ) -> Result<u64>;

    /// Drop the routine if present and recreate it from its definition.
    async fn replace_routine(
        &self,
        database: &str,
        routine: &RoutineDescriptor,
        create_statement: &str,
    ) -> Result<()>;

    /// Check the connection.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}
