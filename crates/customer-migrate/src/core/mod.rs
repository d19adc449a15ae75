//! Core abstractions shared by the engine and the drivers.
//!
//! - [`schema`]: table, column, foreign key and routine metadata
//! - [`filter`]: row selection for a table copy
//! - [`value`]: row values and batches
//! - [`traits`]: source and destination database traits

pub mod filter;
pub mod schema;
pub mod traits;
pub mod value;

pub use filter::{JoinPath, RowFilter};
pub use schema::{
    Column, ForeignKey, ForeignKeySource, RoutineDescriptor, RoutineKind, SchemaSnapshot,
    TableDescriptor,
};
pub use traits::{ReadOptions, SourceReader, TargetWriter};
pub use value::{Batch, Row, SqlValue};
