//! MySQL/MariaDB SQL generation for filtered, paginated reads.

use crate::core::{RowFilter, TableDescriptor};

/// Alias of the table being copied.
const CHILD: &str = "t";
/// Alias of the parent table in an indirect join.
const PARENT: &str = "p";

/// Quote a MySQL identifier, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `db`.`table`
pub fn qualify(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

fn aliased(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote_ident(column))
}

fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// How consecutive batches are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// `pk > after ORDER BY pk`, for single-column integer keys.
    Keyset { column: String, after: Option<i64> },
    /// `ORDER BY ... LIMIT n OFFSET m`.
    Offset { order_by: Vec<String>, offset: u64 },
}

impl Page {
    /// First page for a table.
    pub fn first(table: &TableDescriptor) -> Self {
        match table.keyset_column() {
            Some(col) => Page::Keyset {
                column: col.name.clone(),
                after: None,
            },
            None => Page::Offset {
                order_by: if table.primary_key.is_empty() {
                    table.column_names()
                } else {
                    table.primary_key.clone()
                },
                offset: 0,
            },
        }
    }
}

/// JOIN fragment and WHERE conditions for a filter.
fn filter_parts(table: &TableDescriptor, filter: &RowFilter) -> (String, Vec<String>) {
    match filter {
        RowFilter::All => (String::new(), Vec::new()),
        RowFilter::ColumnIn { column, ids } => (
            String::new(),
            vec![format!("{} IN ({})", aliased(CHILD, column), id_list(ids))],
        ),
        RowFilter::ParentIn { join, ids } => (
            format!(
                " INNER JOIN {} {} ON {} = {}",
                qualify(&table.database, &join.parent_table),
                PARENT,
                aliased(CHILD, &join.local_column),
                aliased(PARENT, &join.parent_column)
            ),
            vec![format!(
                "{} IN ({})",
                aliased(PARENT, &join.parent_filter_column),
                id_list(ids)
            )],
        ),
    }
}

/// Build the SELECT for one batch.
pub fn build_select(table: &TableDescriptor, filter: &RowFilter, page: &Page, limit: usize) -> String {
    let cols = table
        .columns
        .iter()
        .map(|c| aliased(CHILD, &c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let (join, mut conditions) = filter_parts(table, filter);

    let order_by = match page {
        Page::Keyset { column, after } => {
            if let Some(after) = after {
                conditions.push(format!("{} > {}", aliased(CHILD, column), after));
            }
            vec![aliased(CHILD, column)]
        }
        Page::Offset { order_by, .. } => order_by.iter().map(|c| aliased(CHILD, c)).collect(),
    };

    let mut sql = format!(
        "SELECT {} FROM {} {}{}",
        cols,
        qualify(&table.database, &table.name),
        CHILD,
        join
    );

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    }

    sql.push_str(&format!(" LIMIT {}", limit));

    if let Page::Offset { offset, .. } = page {
        if *offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }

    sql
}

/// Build the COUNT(*) for a filter.
pub fn build_count(table: &TableDescriptor, filter: &RowFilter) -> String {
    let (join, conditions) = filter_parts(table, filter);
    let mut sql = format!(
        "SELECT COUNT(*) AS cnt FROM {} {}{}",
        qualify(&table.database, &table.name),
        CHILD,
        join
    );
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql
}

/// Multi-row `INSERT IGNORE` with `?` placeholders.
pub fn build_insert_ignore(database: &str, table: &str, columns: &[String], rows: usize) -> String {
    let col_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row; rows].join(", ");
    format!(
        "INSERT IGNORE INTO {} ({}) VALUES {}",
        qualify(database, table),
        col_list,
        values
    )
}
