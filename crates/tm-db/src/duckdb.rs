//! DuckDB database backend implementation
//!
//! DuckDB has no advisory locks. A database file is opened read-write by one
//! process at a time, so the migration lock only has to exclude sessions in
//! this process: it is an entry in a process-wide registry keyed by the
//! database identity and the [`LockToken`]. The entry goes away with the
//! session (explicit unlock or drop) and with the process, never persisting
//! in the file.

use crate::error::{DbError, DbResult};
use crate::lock::{Deadline, LockToken, LOCK_POLL_INTERVAL};
use crate::traits::Database;
use async_trait::async_trait;
use duckdb::{params, Connection};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tm_core::TableName;

/// Migration locks held by DuckDB sessions in this process.
static HELD_LOCKS: Mutex<BTreeSet<(Arc<str>, i64)>> = Mutex::new(BTreeSet::new());

/// DuckDB database backend
pub struct DuckDbBackend {
    conn: Mutex<Connection>,
    /// Canonical file path, or a unique id for an in-memory database
    database: Arc<str>,
    table: TableName,
    held: Option<LockToken>,
    poll_interval: Duration,
}

impl DuckDbBackend {
    /// Create a new in-memory DuckDB connection
    pub fn in_memory(table: TableName) -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        let database = format!(":memory:{}", uuid::Uuid::new_v4());
        Ok(Self::with_connection(conn, database.into(), table))
    }

    /// Create a new DuckDB connection from a file path
    pub fn from_path(path: &Path, table: TableName) -> DbResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DbError::ConnectionError(format!("{e}: {}", path.display())))?;
        let canonical = std::fs::canonicalize(path)
            .map_err(|e| DbError::ConnectionError(format!("{e}: {}", path.display())))?;
        let database = canonical.display().to_string();
        Ok(Self::with_connection(conn, database.into(), table))
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str, table: TableName) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory(table)
        } else {
            Self::from_path(Path::new(path), table)
        }
    }

    fn with_connection(conn: Connection, database: Arc<str>, table: TableName) -> Self {
        Self {
            conn: Mutex::new(conn),
            database,
            table,
            held: None,
            poll_interval: LOCK_POLL_INTERVAL,
        }
    }

    /// Open a second session on the same database.
    ///
    /// The new session holds no lock and contends with `self` for it like a
    /// separate migrator would.
    pub fn try_clone(&self) -> DbResult<Self> {
        self.session(self.table.clone())
    }

    /// Open another session on the same database bookkeeping `table`.
    pub fn session(&self, table: TableName) -> DbResult<Self> {
        let conn = self
            .conn()?
            .try_clone()
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self::with_connection(conn, Arc::clone(&self.database), table)
            .with_poll_interval(self.poll_interval))
    }

    /// Override the delay between lock attempts while another session holds it.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The bookkeeping table this backend writes.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    /// Create the table's schema when the name is qualified
    fn ensure_schema_sync(&self, conn: &Connection) -> DbResult<()> {
        if let Some(schema) = self.table.schema() {
            conn.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
                .map_err(|e| DbError::StorageError(format!("create schema {schema}: {e}")))?;
        }
        Ok(())
    }

    /// Compute the lock token for this database, schema, and table
    fn lock_token_sync(&self) -> DbResult<LockToken> {
        let conn = self.conn()?;
        let (database, schema): (String, String) = conn
            .query_row("SELECT current_database(), current_schema()", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| DbError::LockError(format!("read database identity: {e}")))?;
        Ok(LockToken::derive(&database, &schema, self.table.as_str()))
    }

    fn registry_key(&self, token: LockToken) -> (Arc<str>, i64) {
        (Arc::clone(&self.database), token.key())
    }

    /// Single acquisition attempt; `Ok(false)` when another session holds it
    fn try_lock_sync(&self, token: LockToken) -> DbResult<bool> {
        let mut held = HELD_LOCKS
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))?;
        Ok(held.insert(self.registry_key(token)))
    }

    fn unlock_sync(&self, token: LockToken) -> DbResult<()> {
        let mut held = HELD_LOCKS
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))?;
        if !held.remove(&self.registry_key(token)) {
            return Err(DbError::LockError(format!(
                "lock {token} is not held on {}",
                self.database
            )));
        }
        Ok(())
    }

    fn ensure_bookkeeping_sync(&self) -> DbResult<()> {
        let conn = self.conn()?;
        self.ensure_schema_sync(&conn)?;
        // No primary key: the single row is kept by update-or-insert
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version UBIGINT NOT NULL)",
            self.table
        ))
        .map_err(|e| DbError::StorageError(format!("create table {}: {e}", self.table)))
    }

    fn read_version_sync(&self) -> DbResult<u64> {
        let conn = self.conn()?;
        let sql = format!("SELECT version FROM {} LIMIT 1", self.table);
        match conn.query_row(&sql, [], |row| row.get::<_, u64>(0)) {
            Ok(version) => Ok(version),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DbError::StorageError(format!(
                "read version from {}: {e}",
                self.table
            ))),
        }
    }

    fn write_version_sync(&self, version: u64) -> DbResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                &format!("UPDATE {} SET version = ?", self.table),
                params![version],
            )
            .map_err(|e| DbError::StorageError(format!("update {}: {e}", self.table)))?;
        if updated > 0 {
            return Ok(());
        }

        conn.execute(
            &format!("INSERT INTO {} (version) VALUES (?)", self.table),
            params![version],
        )
        .map_err(|e| DbError::StorageError(format!("insert into {}: {e}", self.table)))?;
        Ok(())
    }

    /// Execute `sql` within a `BEGIN` / `COMMIT` transaction, rolling back on
    /// error.
    fn apply_script_sync(&self, sql: &str) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN TRANSACTION")
            .map_err(|e| DbError::ScriptError(format!("BEGIN failed: {e}")))?;

        if let Err(e) = conn.execute_batch(sql) {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(DbError::ScriptError(e.to_string()));
        }

        if let Err(e) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(DbError::ScriptError(format!("COMMIT failed: {e}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for DuckDbBackend {
    async fn lock(&mut self, timeout: Option<Duration>) -> DbResult<()> {
        if let Some(token) = self.held {
            return Err(DbError::LockError(format!(
                "lock {token} is already held by this session"
            )));
        }

        let token = self.lock_token_sync()?;
        let deadline = Deadline::start(timeout);
        loop {
            if self.try_lock_sync(token)? {
                log::debug!("Acquired migration lock {token} on {}", self.table);
                self.held = Some(token);
                return Ok(());
            }
            if deadline.expired() {
                return Err(DbError::LockTimeout {
                    token,
                    waited: deadline.waited(),
                });
            }
            log::debug!("Migration lock {token} is held elsewhere, retrying");
            tokio::time::sleep(deadline.next_delay(self.poll_interval)).await;
        }
    }

    async fn ensure_bookkeeping(&mut self) -> DbResult<()> {
        self.ensure_bookkeeping_sync()
    }

    async fn read_version(&mut self) -> DbResult<u64> {
        self.read_version_sync()
    }

    async fn write_version(&mut self, version: u64) -> DbResult<()> {
        self.write_version_sync(version)
    }

    async fn apply_script(&mut self, sql: &str) -> DbResult<()> {
        self.apply_script_sync(sql)
    }

    async fn unlock(&mut self) -> DbResult<()> {
        let token = self
            .held
            .take()
            .ok_or_else(|| DbError::LockError("no migration lock is held".to_string()))?;
        self.unlock_sync(token)?;
        log::debug!("Released migration lock {token} on {}", self.table);
        Ok(())
    }

    fn db_type(&self) -> &'static str {
        "duckdb"
    }
}

impl Drop for DuckDbBackend {
    fn drop(&mut self) {
        if let Some(token) = self.held.take() {
            log::warn!("Releasing migration lock {token} held by a dropped session");
            if let Err(e) = self.unlock_sync(token) {
                log::warn!("Could not release migration lock {token}: {e}");
            }
        }
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
