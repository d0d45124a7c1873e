//! Error types for tm-db

use crate::lock::LockToken;
use std::time::Duration;
use thiserror::Error;

/// Database gateway errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Lock acquisition or release failed (D002)
    #[error("[D002] Migration lock failed: {0}")]
    LockError(String),

    /// Lock not granted before the deadline (D003)
    #[error("[D003] Timed out after {waited:?} waiting for migration lock {token}")]
    LockTimeout { token: LockToken, waited: Duration },

    /// Bookkeeping table creation, read, or write failed (D004)
    #[error("[D004] Bookkeeping table operation failed: {0}")]
    StorageError(String),

    /// Migration script failed and was rolled back (D005)
    #[error("[D005] Migration script failed: {0}")]
    ScriptError(String),

    /// Mutex poisoned (D006)
    #[error("[D006] Database mutex poisoned: {0}")]
    MutexPoisoned(String),
}

impl DbError {
    /// Whether this is a lock failure caused by the acquisition deadline.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, DbError::LockTimeout { .. })
    }
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;
