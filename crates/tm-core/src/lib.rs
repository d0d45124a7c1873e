//! tm-core - Core library for Tidemark
//!
//! This crate provides the migration record and ordered migration set types,
//! the loaders that build a set from a directory or from files bundled into
//! the binary, the validated bookkeeping table name, and configuration
//! parsing shared by all Tidemark components.

pub mod config;
pub mod error;
pub mod migration;
pub mod table_name;

pub use config::{Config, DatabaseConfig, DbType};
pub use error::{CoreError, CoreResult};
pub use migration::{Migration, MigrationSet};
pub use table_name::{TableName, DEFAULT_TABLE};
