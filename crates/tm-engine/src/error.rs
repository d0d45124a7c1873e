//! Error types for tm-engine

use std::fmt;
use thiserror::Error;
use tm_db::DbError;

/// Step of a migration run, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckVersions,
    Lock,
    EnsureBookkeeping,
    ReadVersion,
    ApplyScript,
    WriteVersion,
    Unlock,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CheckVersions => "check versions",
            Stage::Lock => "lock",
            Stage::EnsureBookkeeping => "ensure bookkeeping",
            Stage::ReadVersion => "read version",
            Stage::ApplyScript => "apply script",
            Stage::WriteVersion => "write version",
            Stage::Unlock => "unlock",
        };
        f.write_str(name)
    }
}

/// Migration run errors
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Lock could not be acquired; nothing else ran (M001)
    #[error("[M001] Failed to acquire migration lock: {0}")]
    Lock(#[source] DbError),

    /// Bookkeeping table could not be created (M002)
    #[error("[M002] Failed to create bookkeeping table: {0}")]
    Bookkeeping(#[source] DbError),

    /// Last applied version could not be read (M003)
    #[error("[M003] Failed to read last applied version: {0}")]
    ReadVersion(#[source] DbError),

    /// Migration script failed and was rolled back (M004)
    #[error("[M004] Migration {version} from {path} failed: {source}")]
    Script {
        version: u64,
        path: String,
        #[source]
        source: DbError,
    },

    /// Script committed but its version was not recorded (M005)
    #[error("[M005] Migration {version} was committed but recording it failed: {source}")]
    WriteVersion {
        version: u64,
        #[source]
        source: DbError,
    },

    /// Run succeeded but the lock could not be released (M006)
    #[error("[M006] Failed to release migration lock: {0}")]
    Unlock(#[source] DbError),

    /// Set holds a version the database cannot record; nothing ran (M008)
    #[error("[M008] Migration {version} exceeds the highest version {db_type} can record ({max})")]
    VersionOutOfRange {
        version: u64,
        max: u64,
        db_type: &'static str,
    },

    /// Run failed and releasing the lock failed too (M007)
    #[error("{primary}; releasing the migration lock also failed: {unlock}")]
    UnlockAfterFailure {
        primary: Box<MigrateError>,
        unlock: DbError,
    },
}

impl MigrateError {
    /// The stage the run failed in. For a merged unlock failure this is the
    /// stage of the primary error.
    pub fn stage(&self) -> Stage {
        match self {
            MigrateError::VersionOutOfRange { .. } => Stage::CheckVersions,
            MigrateError::Lock(_) => Stage::Lock,
            MigrateError::Bookkeeping(_) => Stage::EnsureBookkeeping,
            MigrateError::ReadVersion(_) => Stage::ReadVersion,
            MigrateError::Script { .. } => Stage::ApplyScript,
            MigrateError::WriteVersion { .. } => Stage::WriteVersion,
            MigrateError::Unlock(_) => Stage::Unlock,
            MigrateError::UnlockAfterFailure { primary, .. } => primary.stage(),
        }
    }

    /// Version of the migration being applied or recorded when the run failed.
    pub fn failed_version(&self) -> Option<u64> {
        match self {
            MigrateError::Script { version, .. } | MigrateError::WriteVersion { version, .. } => {
                Some(*version)
            }
            MigrateError::UnlockAfterFailure { primary, .. } => primary.failed_version(),
            _ => None,
        }
    }

    /// Whether the run gave up waiting for another migrator's lock.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, MigrateError::Lock(e) if e.is_lock_timeout())
    }
}

/// Result type alias for MigrateError
pub type MigrateResult<T> = Result<T, MigrateError>;
