//! Database drivers.

pub mod mysql;

pub use mysql::{MysqlSource, MysqlTarget};
