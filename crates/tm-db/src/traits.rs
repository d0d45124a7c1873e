//! Database trait definition

use crate::error::DbResult;
use async_trait::async_trait;
use std::time::Duration;

/// The capability set the migration engine drives, one implementation per
/// backend.
///
/// A value of this trait is one database session: the lock taken by
/// [`lock`](Database::lock) belongs to it, and every other call runs on the
/// same session. The engine calls `lock` at most once per run and always
/// calls [`unlock`](Database::unlock) after a successful `lock`.
#[async_trait]
pub trait Database: Send {
    /// Wait until the exclusive migration lock for this bookkeeping table is
    /// held.
    ///
    /// With `Some(timeout)` the wait fails with
    /// [`DbError::LockTimeout`](crate::DbError::LockTimeout) once the timeout
    /// elapses. Not reentrant: locking an already-held lock is an error.
    async fn lock(&mut self, timeout: Option<Duration>) -> DbResult<()>;

    /// Create the bookkeeping table if it does not exist.
    async fn ensure_bookkeeping(&mut self) -> DbResult<()>;

    /// Highest applied version, 0 when nothing has been recorded.
    async fn read_version(&mut self) -> DbResult<u64>;

    /// Record `version` as the highest applied one.
    ///
    /// Updates the single bookkeeping row, inserting it only when none
    /// exists.
    async fn write_version(&mut self, version: u64) -> DbResult<()>;

    /// Execute a migration script in its own transaction.
    ///
    /// Either every statement commits or the transaction is rolled back.
    async fn apply_script(&mut self, sql: &str) -> DbResult<()>;

    /// Release the lock acquired by [`lock`](Database::lock).
    async fn unlock(&mut self) -> DbResult<()>;

    /// Highest version the bookkeeping table can record.
    fn max_version(&self) -> u64 {
        u64::MAX
    }

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}
