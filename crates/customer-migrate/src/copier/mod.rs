//! Filtered bulk copy of one table.

mod guard;

pub use guard::ForeignKeyChecksGuard;

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::Category;
use crate::core::{ReadOptions, RowFilter, SourceReader, TableDescriptor, TargetWriter};
use crate::error::{MigrateError, Result};

/// Counters for one table copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    /// Rows selected on the source.
    pub rows_read: u64,
    /// Rows the destination actually inserted; duplicates are ignored.
    pub rows_written: u64,
    pub batches: usize,
}

/// Row filter for a table category.
pub fn row_filter(category: &Category, customer_ids: &[i64], seed_user_ids: &[i64]) -> RowFilter {
    match category {
        Category::DirectCustomer { column } => RowFilter::ColumnIn {
            column: column.clone(),
            ids: customer_ids.to_vec(),
        },
        Category::DirectUser { column } => RowFilter::ColumnIn {
            column: column.clone(),
            ids: seed_user_ids.to_vec(),
        },
        Category::IndirectFk { join } => RowFilter::ParentIn {
            join: join.clone(),
            ids: customer_ids.to_vec(),
        },
        Category::Reference => RowFilter::All,
    }
}

/// Streams rows from the source and writes them with `INSERT IGNORE`.
#[derive(Clone)]
pub struct DataCopier {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    batch_size: usize,
}

impl DataCopier {
    pub fn new(source: Arc<dyn SourceReader>, target: Arc<dyn TargetWriter>, batch_size: usize) -> Self {
        Self {
            source,
            target,
            batch_size: batch_size.max(1),
        }
    }

    /// Check that the destination has the table and every source column.
    pub async fn check_destination(&self, table: &TableDescriptor) -> Result<()> {
        let columns = self
            .target
            .table_columns(&table.database, &table.name)
            .await
            .map_err(|e| into_copy_error(&table.full_name(), e))?
            .ok_or_else(|| {
                MigrateError::schema_mismatch(table.full_name(), "table does not exist in destination")
            })?;

        let missing: Vec<&str> = table
            .columns
            .iter()
            .filter(|c| !columns.iter().any(|d| d.eq_ignore_ascii_case(&c.name)))
            .map(|c| c.name.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(MigrateError::schema_mismatch(
                table.full_name(),
                format!("destination is missing columns: {}", missing.join(", ")),
            ));
        }
        Ok(())
    }

    /// Copy the rows of `table` selected by `filter`.
    ///
    /// Cancellation is checked between batches; a batch already sent to the
    /// destination is allowed to finish.
    pub async fn copy(
        &self,
        table: &TableDescriptor,
        filter: &RowFilter,
        cancel: &CancellationToken,
    ) -> Result<CopyStats> {
        let full_name = table.full_name();
        self.check_destination(table).await?;

        let mut stats = CopyStats::default();
        if filter.is_empty_selection() {
            debug!("{}: empty id set, nothing to copy", full_name);
            return Ok(stats);
        }

        let columns = table.column_names();
        let mut rx = self.source.read_table(ReadOptions {
            table: table.clone(),
            filter: filter.clone(),
            batch_size: self.batch_size,
        });

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
                next = rx.recv() => next,
            };
            let Some(batch) = next else {
                break;
            };
            let batch = batch.map_err(|e| into_copy_error(&full_name, e))?;
            let is_last = batch.is_last;

            if !batch.is_empty() {
                let rows = batch.len() as u64;
                let written = self
                    .target
                    .insert_ignore(&table.database, &table.name, &columns, batch)
                    .await
                    .map_err(|e| into_copy_error(&full_name, e))?;
                stats.rows_read += rows;
                stats.rows_written += written;
                stats.batches += 1;
                debug!(
                    "{}: batch {} ({} rows, {} inserted)",
                    full_name, stats.batches, rows, written
                );
            }

            if is_last {
                break;
            }
        }

        Ok(stats)
    }
}

/// Attribute a driver error to the table being copied.
fn into_copy_error(table: &str, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Copy { .. } | MigrateError::SchemaMismatch { .. } | MigrateError::Cancelled => err,
        other => MigrateError::copy(table, other.to_string()),
    }
}
