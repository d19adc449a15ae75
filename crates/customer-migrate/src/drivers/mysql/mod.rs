//! MySQL/MariaDB drivers.
//!
//! - [`MysqlSource`]: read-only source (SQLx pool)
//! - [`MysqlTarget`]: destination writer (mysql_async, single write session)
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

pub mod dialect;
mod source;
mod target;

pub use source::MysqlSource;
pub use target::MysqlTarget;

/// Schemas never migrated and never listed.
pub const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];
