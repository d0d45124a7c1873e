//! tm-db - Database gateway for Tidemark
//!
//! This crate provides the `Database` trait, the capability set the migration
//! engine drives (lock, bookkeeping, version I/O, transactional script
//! execution, unlock), and its implementations for DuckDB and PostgreSQL.

pub mod duckdb;
pub mod error;
pub mod lock;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use duckdb::DuckDbBackend;
pub use error::{DbError, DbResult};
pub use lock::LockToken;
#[cfg(feature = "postgres")]
pub use postgres::{PgConnectionBackend, PgPoolBackend, PgSession, PostgresBackend};
pub use traits::Database;
