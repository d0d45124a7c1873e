use super::*;
use async_trait::async_trait;
use tm_core::Migration;
use tm_db::{DbError, DbResult, LockToken};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Lock(Option<Duration>),
    EnsureBookkeeping,
    ReadVersion,
    ApplyScript(String),
    WriteVersion(u64),
    Unlock,
}

/// In-memory database that records every call and fails on request.
#[derive(Default)]
struct RecordingDb {
    version: u64,
    calls: Vec<Call>,
    fail_lock: bool,
    fail_bookkeeping: bool,
    fail_read: bool,
    fail_script: Option<&'static str>,
    fail_write: Option<u64>,
    fail_unlock: bool,
    max_version: Option<u64>,
}

impl RecordingDb {
    fn at_version(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    fn scripts(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::ApplyScript(sql) => Some(sql.as_str()),
                _ => None,
            })
            .collect()
    }

    fn unlock_count(&self) -> usize {
        self.calls.iter().filter(|c| **c == Call::Unlock).count()
    }
}

#[async_trait]
impl Database for RecordingDb {
    async fn lock(&mut self, timeout: Option<Duration>) -> DbResult<()> {
        self.calls.push(Call::Lock(timeout));
        if self.fail_lock {
            return Err(DbError::LockTimeout {
                token: LockToken::derive("test", "public", "schema_migrations"),
                waited: timeout.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn ensure_bookkeeping(&mut self) -> DbResult<()> {
        self.calls.push(Call::EnsureBookkeeping);
        if self.fail_bookkeeping {
            return Err(DbError::StorageError("permission denied".to_string()));
        }
        Ok(())
    }

    async fn read_version(&mut self) -> DbResult<u64> {
        self.calls.push(Call::ReadVersion);
        if self.fail_read {
            return Err(DbError::StorageError("relation vanished".to_string()));
        }
        Ok(self.version)
    }

    async fn write_version(&mut self, version: u64) -> DbResult<()> {
        self.calls.push(Call::WriteVersion(version));
        if self.fail_write == Some(version) {
            return Err(DbError::StorageError("disk full".to_string()));
        }
        self.version = version;
        Ok(())
    }

    async fn apply_script(&mut self, sql: &str) -> DbResult<()> {
        self.calls.push(Call::ApplyScript(sql.to_string()));
        if self.fail_script == Some(sql) {
            return Err(DbError::ScriptError("syntax error".to_string()));
        }
        Ok(())
    }

    async fn unlock(&mut self) -> DbResult<()> {
        self.calls.push(Call::Unlock);
        if self.fail_unlock {
            return Err(DbError::LockError("connection reset".to_string()));
        }
        Ok(())
    }

    fn max_version(&self) -> u64 {
        self.max_version.unwrap_or(u64::MAX)
    }

    fn db_type(&self) -> &'static str {
        "recording"
    }
}

fn migration(version: u64, name: &str, sql: &str) -> Migration {
    Migration::new(version, name, format!("{version:04}_{name}.sql"), sql)
}

fn two_migrations() -> Migrator {
    Migrator::new(
        MigrationSet::new(vec![
            migration(1, "init", "CREATE TABLE t (id INT)"),
            migration(2, "add_col", "ALTER TABLE t ADD c INT"),
        ])
        .unwrap(),
    )
}

#[tokio::test]
async fn test_empty_set() {
    let mut db = RecordingDb::default();
    let summary = Migrator::default().migrate(&mut db).await.unwrap();

    assert!(summary.is_noop());
    assert_eq!(summary.to_version, 0);
    assert_eq!(db.version, 0);
    assert_eq!(
        db.calls,
        vec![
            Call::Lock(None),
            Call::EnsureBookkeeping,
            Call::ReadVersion,
            Call::Unlock
        ]
    );
}

#[tokio::test]
async fn test_fresh_apply() {
    let mut db = RecordingDb::default();
    let summary = two_migrations().migrate(&mut db).await.unwrap();

    assert_eq!(
        summary,
        MigrateSummary {
            from_version: 0,
            to_version: 2,
            applied: vec![1, 2],
        }
    );
    assert_eq!(db.version, 2);
    assert_eq!(
        db.calls,
        vec![
            Call::Lock(None),
            Call::EnsureBookkeeping,
            Call::ReadVersion,
            Call::ApplyScript("CREATE TABLE t (id INT)".to_string()),
            Call::WriteVersion(1),
            Call::ApplyScript("ALTER TABLE t ADD c INT".to_string()),
            Call::WriteVersion(2),
            Call::Unlock,
        ]
    );
}

#[tokio::test]
async fn test_partial_resume() {
    let mut db = RecordingDb::at_version(1);
    let summary = two_migrations().migrate(&mut db).await.unwrap();

    assert_eq!(summary.from_version, 1);
    assert_eq!(summary.applied, vec![2]);
    assert_eq!(db.scripts(), vec!["ALTER TABLE t ADD c INT"]);
    assert_eq!(db.version, 2);
}

#[tokio::test]
async fn test_recorded_version_ahead_of_set() {
    let mut db = RecordingDb::at_version(9);
    let summary = two_migrations().migrate(&mut db).await.unwrap();

    assert!(summary.is_noop());
    assert_eq!(summary.to_version, 9);
    assert!(db.scripts().is_empty());
    assert_eq!(db.version, 9);
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let migrator = two_migrations();
    let mut db = RecordingDb::default();
    migrator.migrate(&mut db).await.unwrap();

    db.calls.clear();
    let summary = migrator.migrate(&mut db).await.unwrap();
    assert!(summary.is_noop());
    assert!(db.scripts().is_empty());
    assert!(!db.calls.iter().any(|c| matches!(c, Call::WriteVersion(_))));
    assert_eq!(db.version, 2);
}

#[tokio::test]
async fn test_applies_in_ascending_order() {
    // Built out of order, with gaps
    let migrator = Migrator::new(
        MigrationSet::new(vec![
            migration(30, "c", "c"),
            migration(2, "a", "a"),
            migration(10, "b", "b"),
        ])
        .unwrap(),
    );
    let mut db = RecordingDb::at_version(2);
    let summary = migrator.migrate(&mut db).await.unwrap();

    assert_eq!(summary.applied, vec![10, 30]);
    assert_eq!(db.scripts(), vec!["b", "c"]);
    let writes: Vec<u64> = db
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::WriteVersion(v) => Some(*v),
            _ => None,
        })
        .collect();
    assert_eq!(writes, vec![10, 30]);
}

#[tokio::test]
async fn test_mid_run_failure_then_resume() {
    let migrator = Migrator::new(
        MigrationSet::new(vec![
            migration(1, "ok", "ok"),
            migration(2, "broken", "broken"),
            migration(3, "later", "later"),
        ])
        .unwrap(),
    );
    let mut db = RecordingDb {
        fail_script: Some("broken"),
        ..Default::default()
    };

    let err = migrator.migrate(&mut db).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Script { version: 2, ref path, .. } if path == "0002_broken.sql"
    ));
    assert_eq!(err.stage(), Stage::ApplyScript);
    assert_eq!(err.failed_version(), Some(2));
    assert!(err.to_string().contains("0002_broken.sql"));

    // Nothing after the failing migration ran
    assert_eq!(db.scripts(), vec!["ok", "broken"]);
    assert_eq!(db.version, 1);
    assert_eq!(db.unlock_count(), 1);

    // Fix the script and resume
    db.fail_script = None;
    db.calls.clear();
    let summary = migrator.migrate(&mut db).await.unwrap();
    assert_eq!(summary.from_version, 1);
    assert_eq!(summary.applied, vec![2, 3]);
    assert_eq!(db.scripts(), vec!["broken", "later"]);
}

#[tokio::test]
async fn test_write_failure_leaves_script_unrecorded() {
    let mut db = RecordingDb {
        fail_write: Some(2),
        ..Default::default()
    };
    let migrator = two_migrations();

    let err = migrator.migrate(&mut db).await.unwrap_err();
    assert!(matches!(err, MigrateError::WriteVersion { version: 2, .. }));
    assert_eq!(err.stage(), Stage::WriteVersion);
    assert_eq!(db.version, 1);
    assert_eq!(db.unlock_count(), 1);

    // The committed but unrecorded script is applied again next run
    db.fail_write = None;
    db.calls.clear();
    migrator.migrate(&mut db).await.unwrap();
    assert_eq!(db.scripts(), vec!["ALTER TABLE t ADD c INT"]);
    assert_eq!(db.version, 2);
}

#[tokio::test]
async fn test_lock_failure_skips_everything() {
    let mut db = RecordingDb {
        fail_lock: true,
        ..Default::default()
    };
    let err = two_migrations()
        .with_lock_timeout(Duration::from_millis(5))
        .migrate(&mut db)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Lock(_)));
    assert!(err.is_lock_timeout());
    assert_eq!(err.stage(), Stage::Lock);
    assert_eq!(db.calls, vec![Call::Lock(Some(Duration::from_millis(5)))]);
}

#[tokio::test]
async fn test_version_beyond_database_limit_rejected_before_lock() {
    let limit = i64::MAX as u64;
    let mut db = RecordingDb {
        max_version: Some(limit),
        ..Default::default()
    };
    let migrator = Migrator::new(
        MigrationSet::new(vec![
            migration(1, "init", "CREATE TABLE t (id INT)"),
            migration(limit + 1, "huge", "CREATE TABLE huge (id INT)"),
        ])
        .unwrap(),
    );

    let err = migrator.migrate(&mut db).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::VersionOutOfRange { version, max, db_type: "recording" }
            if version == limit + 1 && max == limit
    ));
    assert!(err.to_string().starts_with("[M008]"));
    assert_eq!(err.stage(), Stage::CheckVersions);
    assert!(db.calls.is_empty());
    assert!(db.scripts().is_empty());
}

#[tokio::test]
async fn test_version_at_database_limit_applies() {
    let limit = i64::MAX as u64;
    let mut db = RecordingDb {
        max_version: Some(limit),
        ..Default::default()
    };
    let migrator = Migrator::new(
        MigrationSet::new(vec![migration(limit, "last", "SELECT 1")]).unwrap(),
    );

    let summary = migrator.migrate(&mut db).await.unwrap();
    assert_eq!(summary.applied, vec![limit]);
    assert_eq!(db.version, limit);
}

#[tokio::test]
async fn test_lock_timeout_passed_to_database() {
    let mut db = RecordingDb::default();
    let migrator = two_migrations().with_lock_timeout(Duration::from_secs(3));
    assert_eq!(migrator.lock_timeout(), Some(Duration::from_secs(3)));

    migrator.migrate(&mut db).await.unwrap();
    assert_eq!(db.calls[0], Call::Lock(Some(Duration::from_secs(3))));
}

#[tokio::test]
async fn test_unlock_once_on_every_exit_path() {
    let cases: Vec<(&str, RecordingDb, Option<Stage>)> = vec![
        ("success", RecordingDb::default(), None),
        (
            "bookkeeping",
            RecordingDb {
                fail_bookkeeping: true,
                ..Default::default()
            },
            Some(Stage::EnsureBookkeeping),
        ),
        (
            "read",
            RecordingDb {
                fail_read: true,
                ..Default::default()
            },
            Some(Stage::ReadVersion),
        ),
        (
            "script",
            RecordingDb {
                fail_script: Some("CREATE TABLE t (id INT)"),
                ..Default::default()
            },
            Some(Stage::ApplyScript),
        ),
        (
            "write",
            RecordingDb {
                fail_write: Some(1),
                ..Default::default()
            },
            Some(Stage::WriteVersion),
        ),
    ];

    let migrator = two_migrations();
    for (label, mut db, expected) in cases {
        let result = migrator.migrate(&mut db).await;
        assert_eq!(result.err().map(|e| e.stage()), expected, "case {label}");
        assert_eq!(db.unlock_count(), 1, "case {label}");
        assert_eq!(db.calls.last(), Some(&Call::Unlock), "case {label}");
    }
}

#[tokio::test]
async fn test_bookkeeping_failure_skips_read() {
    let mut db = RecordingDb {
        fail_bookkeeping: true,
        ..Default::default()
    };
    let err = two_migrations().migrate(&mut db).await.unwrap_err();

    assert!(matches!(err, MigrateError::Bookkeeping(_)));
    assert!(err.to_string().starts_with("[M002]"));
    assert_eq!(
        db.calls,
        vec![Call::Lock(None), Call::EnsureBookkeeping, Call::Unlock]
    );
}

#[tokio::test]
async fn test_unlock_failure_after_success() {
    let mut db = RecordingDb {
        fail_unlock: true,
        ..Default::default()
    };
    let err = two_migrations().migrate(&mut db).await.unwrap_err();

    assert!(matches!(err, MigrateError::Unlock(_)));
    assert_eq!(err.stage(), Stage::Unlock);
    // The migrations themselves were applied
    assert_eq!(db.version, 2);
}

#[tokio::test]
async fn test_unlock_failure_merged_with_primary() {
    let mut db = RecordingDb {
        fail_script: Some("ALTER TABLE t ADD c INT"),
        fail_unlock: true,
        ..Default::default()
    };
    let err = two_migrations().migrate(&mut db).await.unwrap_err();

    match &err {
        MigrateError::UnlockAfterFailure { primary, unlock } => {
            assert!(matches!(**primary, MigrateError::Script { version: 2, .. }));
            assert!(matches!(unlock, DbError::LockError(_)));
        }
        other => panic!("expected merged error, got {other:?}"),
    }
    assert_eq!(err.stage(), Stage::ApplyScript);
    assert_eq!(err.failed_version(), Some(2));

    let message = err.to_string();
    let primary_at = message.find("syntax error").unwrap();
    let unlock_at = message.find("connection reset").unwrap();
    assert!(primary_at < unlock_at);
    assert_eq!(db.unlock_count(), 1);
}

#[test]
fn test_stage_display() {
    assert_eq!(Stage::CheckVersions.to_string(), "check versions");
    assert_eq!(Stage::Lock.to_string(), "lock");
    assert_eq!(Stage::EnsureBookkeeping.to_string(), "ensure bookkeeping");
    assert_eq!(Stage::WriteVersion.to_string(), "write version");
}

#[test]
fn test_migrator_exposes_migrations() {
    let migrator = two_migrations();
    assert_eq!(migrator.migrations().len(), 2);
    assert_eq!(migrator.migrations().latest_version(), Some(2));
    assert_eq!(migrator.lock_timeout(), None);
}
