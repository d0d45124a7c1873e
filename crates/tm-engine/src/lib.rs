//! tm-engine - Migration engine for Tidemark
//!
//! [`Migrator`] drives one "migrate to latest" run over any
//! [`tm_db::Database`]: take the lock, make sure the bookkeeping table
//! exists, read the last applied version, apply every newer migration in
//! ascending order, and always release the lock.

pub mod error;
pub mod migrator;

pub use error::{MigrateError, MigrateResult, Stage};
pub use migrator::{MigrateSummary, Migrator};
