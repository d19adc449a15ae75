//! Row selection for a table copy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an indirectly related table reaches the customer id.
///
/// The child's `local_column` references `parent_table.parent_column`, and the
/// parent is filtered on `parent_table.parent_filter_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPath {
    pub local_column: String,
    pub parent_table: String,
    pub parent_column: String,
    pub parent_filter_column: String,
}

impl fmt::Display for JoinPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}.{} ({}.{})",
            self.local_column,
            self.parent_table,
            self.parent_column,
            self.parent_table,
            self.parent_filter_column
        )
    }
}

/// Which rows of a table to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// Every row.
    All,
    /// `column IN (ids)`.
    ColumnIn { column: String, ids: Vec<i64> },
    /// Rows whose parent, reached through the join path, has its filter column in `ids`.
    ParentIn { join: JoinPath, ids: Vec<i64> },
}

impl RowFilter {
    /// Check whether the filter can match nothing because its id set is empty.
    pub fn is_empty_selection(&self) -> bool {
        match self {
            RowFilter::All => false,
            RowFilter::ColumnIn { ids, .. } | RowFilter::ParentIn { ids, .. } => ids.is_empty(),
        }
    }
}
