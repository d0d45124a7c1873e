//! Migration runner.

use crate::error::{MigrateError, MigrateResult, Stage};
use std::time::Duration;
use tm_core::MigrationSet;
use tm_db::Database;

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateSummary {
    /// Version recorded before the run.
    pub from_version: u64,
    /// Version recorded after the run.
    pub to_version: u64,
    /// Versions applied by this run, ascending.
    pub applied: Vec<u64>,
}

impl MigrateSummary {
    /// Whether the database was already up to date.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applies a [`MigrationSet`] to a database.
///
/// A `Migrator` holds no per-run state, so one value can migrate any number
/// of databases.
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    migrations: MigrationSet,
    lock_timeout: Option<Duration>,
}

impl Migrator {
    pub fn new(migrations: MigrationSet) -> Self {
        Self {
            migrations,
            lock_timeout: None,
        }
    }

    /// Bound how long [`migrate`](Self::migrate) waits for another migrator
    /// to release the lock. Without it the wait is unbounded.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// Apply every migration newer than the recorded version.
    ///
    /// A set whose highest version exceeds
    /// [`Database::max_version`] is rejected before the lock is taken.
    ///
    /// Runs under the database's migration lock. Once the lock is held it is
    /// released on every exit path; if both the run and the release fail the
    /// returned [`MigrateError::UnlockAfterFailure`] carries both errors.
    ///
    /// Each script commits in its own transaction before its version is
    /// recorded. A failure between those two steps leaves the script applied
    /// but unrecorded, and the next run applies it again, so scripts that may
    /// hit this should be written to tolerate re-execution.
    pub async fn migrate(&self, db: &mut dyn Database) -> MigrateResult<MigrateSummary> {
        log::info!(
            "Migrating {} database ({} migrations known)",
            db.db_type(),
            self.migrations.len()
        );

        if let Some(version) = self.migrations.latest_version() {
            let max = db.max_version();
            if version > max {
                log::error!("Migration {version} cannot be recorded by {}", db.db_type());
                return Err(MigrateError::VersionOutOfRange {
                    version,
                    max,
                    db_type: db.db_type(),
                });
            }
        }

        db.lock(self.lock_timeout).await.map_err(|e| {
            log::error!("Could not acquire migration lock: {e}");
            MigrateError::Lock(e)
        })?;
        log::debug!("Stage complete: {}", Stage::Lock);

        let outcome = self.migrate_locked(db).await;
        let released = db.unlock().await;

        match (outcome, released) {
            (Ok(summary), Ok(())) => {
                log::debug!("Stage complete: {}", Stage::Unlock);
                if summary.is_noop() {
                    log::info!("Database is up to date at version {}", summary.to_version);
                } else {
                    log::info!(
                        "Migrated from version {} to {} ({} applied)",
                        summary.from_version,
                        summary.to_version,
                        summary.applied.len()
                    );
                }
                Ok(summary)
            }
            (Ok(_), Err(unlock)) => {
                log::error!("Migrations applied but the lock was not released: {unlock}");
                Err(MigrateError::Unlock(unlock))
            }
            (Err(primary), Ok(())) => {
                log::error!("Migration failed during {}: {primary}", primary.stage());
                Err(primary)
            }
            (Err(primary), Err(unlock)) => {
                log::error!("Migration failed during {}: {primary}", primary.stage());
                log::warn!("Releasing the migration lock also failed: {unlock}");
                Err(MigrateError::UnlockAfterFailure {
                    primary: Box::new(primary),
                    unlock,
                })
            }
        }
    }

    /// Everything between lock and unlock. Returns early on the first error.
    async fn migrate_locked(&self, db: &mut dyn Database) -> MigrateResult<MigrateSummary> {
        db.ensure_bookkeeping()
            .await
            .map_err(MigrateError::Bookkeeping)?;
        log::debug!("Stage complete: {}", Stage::EnsureBookkeeping);

        let from_version = db.read_version().await.map_err(MigrateError::ReadVersion)?;
        log::debug!(
            "Stage complete: {} (last applied {from_version})",
            Stage::ReadVersion
        );

        let mut summary = MigrateSummary {
            from_version,
            to_version: from_version,
            applied: Vec::new(),
        };

        for migration in self.migrations.pending(from_version) {
            log::debug!("Applying migration {} from {}", migration.version, migration.path);
            db.apply_script(&migration.sql)
                .await
                .map_err(|source| MigrateError::Script {
                    version: migration.version,
                    path: migration.path.clone(),
                    source,
                })?;

            db.write_version(migration.version)
                .await
                .map_err(|source| MigrateError::WriteVersion {
                    version: migration.version,
                    source,
                })?;

            log::info!("Applied migration {} ({})", migration.version, migration.name);
            summary.to_version = migration.version;
            summary.applied.push(migration.version);
        }

        Ok(summary)
    }
}

#[cfg(test)]
#[path = "migrator_test.rs"]
mod tests;
