//! Schema metadata read from the source catalog.
//!
//! A [`SchemaSnapshot`] is taken once per database at plan time and is not
//! refreshed during the run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as reported by the catalog.
    pub name: String,

    /// Lowercase MySQL data type (`int`, `varchar`, `datetime`, ...).
    pub data_type: String,

    /// Whether the integer type is declared `UNSIGNED`.
    #[serde(default)]
    pub unsigned: bool,
}

impl Column {
    /// Create a column with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
            unsigned: false,
        }
    }

    /// Check if the column holds an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
        )
    }
}

/// Where a foreign key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeySource {
    /// Declared constraint in `INFORMATION_SCHEMA`.
    Declared,
    /// Inferred from a `<table>_id` column name.
    Implicit,
}

/// Outgoing single-column foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Local column.
    pub column: String,
    /// Referenced table, in the same database.
    pub ref_table: String,
    /// Referenced column.
    pub ref_column: String,
    pub source: ForeignKeySource,
}

impl ForeignKey {
    /// Create a declared foreign key.
    pub fn declared(
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
            source: ForeignKeySource::Declared,
        }
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Database (schema) name.
    pub database: String,

    /// Table name.
    pub name: String,

    /// Columns in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names in key order.
    pub primary_key: Vec<String>,

    /// Outgoing foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDescriptor {
    /// Create an empty descriptor.
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Find a column by name, ignoring ASCII case.
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// The primary key column when the table can page by keyset:
    /// a single-column integer primary key.
    pub fn keyset_column(&self) -> Option<&Column> {
        match self.primary_key.as_slice() {
            [pk] => self.find_column(pk).filter(|c| c.is_integer()),
            _ => None,
        }
    }
}

/// All tables of one database, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub tables: Vec<TableDescriptor>,
}

impl SchemaSnapshot {
    /// Create a snapshot, sorting tables by name.
    pub fn new(database: impl Into<String>, mut tables: Vec<TableDescriptor>) -> Self {
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            database: database.into(),
            tables,
        }
    }

    /// Look up a table by name, ignoring ASCII case.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// Stored routine kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutineKind {
    Procedure,
    Function,
}

impl RoutineKind {
    /// SQL keyword for the routine kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineKind::Procedure => "PROCEDURE",
            RoutineKind::Function => "FUNCTION",
        }
    }
}

impl fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutineKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PROCEDURE" => Ok(RoutineKind::Procedure),
            "FUNCTION" => Ok(RoutineKind::Function),
            other => Err(MigrateError::Config(format!(
                "unknown routine type '{}'",
                other
            ))),
        }
    }
}

/// A stored procedure or function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineDescriptor {
    pub name: String,
    pub kind: RoutineKind,
}

impl RoutineDescriptor {
    pub fn new(name: impl Into<String>, kind: RoutineKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
