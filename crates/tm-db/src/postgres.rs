//! PostgreSQL database backend implementation
//!
//! The migration lock is a session-level advisory lock keyed by the
//! [`LockToken`], so it is tied to the connection the backend owns. The
//! backend is generic over [`PgSession`] to run on either a dedicated
//! connection or one checked out of a pool.

use crate::error::{DbError, DbResult};
use crate::lock::{Deadline, LockToken, LOCK_POLL_INTERVAL};
use crate::traits::Database;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use std::time::Duration;
use tm_core::TableName;

/// A live PostgreSQL session the backend can run statements on.
pub trait PgSession: Send {
    /// The underlying connection.
    fn connection(&mut self) -> &mut PgConnection;
}

impl PgSession for PgConnection {
    fn connection(&mut self) -> &mut PgConnection {
        self
    }
}

impl PgSession for PoolConnection<Postgres> {
    fn connection(&mut self) -> &mut PgConnection {
        &mut **self
    }
}

/// PostgreSQL database backend
///
/// Versions are stored as `BIGINT`, so the highest recordable version is
/// `i64::MAX`.
pub struct PostgresBackend<S: PgSession> {
    session: S,
    table: TableName,
    held: Option<LockToken>,
    poll_interval: Duration,
}

/// Backend over a dedicated connection.
pub type PgConnectionBackend = PostgresBackend<PgConnection>;

/// Backend over a connection checked out of a [`PgPool`].
pub type PgPoolBackend = PostgresBackend<PoolConnection<Postgres>>;

impl PostgresBackend<PgConnection> {
    /// Open a dedicated connection to `url`.
    pub async fn connect(url: &str, table: TableName) -> DbResult<Self> {
        let conn = PgConnection::connect(url)
            .await
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self::from_connection(conn, table))
    }
}

impl PostgresBackend<PoolConnection<Postgres>> {
    /// Check a connection out of `pool` for the whole run.
    ///
    /// `acquire_timeout` bounds the wait for a free connection; `None` uses
    /// the pool's own acquire timeout.
    pub async fn from_pool(
        pool: &PgPool,
        table: TableName,
        acquire_timeout: Option<Duration>,
    ) -> DbResult<Self> {
        let acquire = pool.acquire();
        let acquired = match acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                DbError::ConnectionError(format!(
                    "no pooled connection available within {limit:?}"
                ))
            })?,
            None => acquire.await,
        };
        let conn = acquired.map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self::from_connection(conn, table))
    }
}

impl<S: PgSession> PostgresBackend<S> {
    /// Wrap an already-open session.
    pub fn from_connection(session: S, table: TableName) -> Self {
        Self {
            session,
            table,
            held: None,
            poll_interval: LOCK_POLL_INTERVAL,
        }
    }

    /// Override the delay between `pg_try_advisory_lock` attempts.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The bookkeeping table this backend writes.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Give the session back, e.g. to return a pooled connection early.
    pub fn into_session(self) -> S {
        self.session
    }

    async fn lock_token(&mut self) -> DbResult<LockToken> {
        let (database, schema): (String, Option<String>) =
            sqlx::query_as("SELECT CURRENT_DATABASE()::text, CURRENT_SCHEMA()::text")
                .fetch_one(self.session.connection())
                .await
                .map_err(|e| DbError::LockError(format!("read database identity: {e}")))?;

        Ok(LockToken::derive(
            &database,
            schema.as_deref().unwrap_or_default(),
            self.table.as_str(),
        ))
    }

    async fn try_lock(&mut self, token: LockToken) -> DbResult<bool> {
        sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(token.key())
            .fetch_one(self.session.connection())
            .await
            .map_err(|e| DbError::LockError(format!("acquire lock {token}: {e}")))
    }
}

#[async_trait]
impl<S: PgSession> Database for PostgresBackend<S> {
    async fn lock(&mut self, timeout: Option<Duration>) -> DbResult<()> {
        if let Some(token) = self.held {
            return Err(DbError::LockError(format!(
                "lock {token} is already held by this session"
            )));
        }

        let token = self.lock_token().await?;
        match timeout {
            None => {
                sqlx::query("SELECT pg_advisory_lock($1)")
                    .bind(token.key())
                    .execute(self.session.connection())
                    .await
                    .map_err(|e| DbError::LockError(format!("acquire lock {token}: {e}")))?;
            }
            Some(_) => {
                let deadline = Deadline::start(timeout);
                while !self.try_lock(token).await? {
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
        }

        log::debug!("Acquired advisory lock {token} for {}", self.table);
        self.held = Some(token);
        Ok(())
    }

    async fn ensure_bookkeeping(&mut self) -> DbResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT PRIMARY KEY)",
            self.table
        );
        sqlx::query(&sql)
            .execute(self.session.connection())
            .await
            .map_err(|e| DbError::StorageError(format!("create table {}: {e}", self.table)))?;
        Ok(())
    }

    async fn read_version(&mut self) -> DbResult<u64> {
        let sql = format!("SELECT version FROM {} LIMIT 1", self.table);
        let stored: Option<i64> = sqlx::query_scalar(&sql)
            .fetch_optional(self.session.connection())
            .await
            .map_err(|e| {
                DbError::StorageError(format!("read version from {}: {e}", self.table))
            })?;

        match stored {
            None => Ok(0),
            Some(v) => u64::try_from(v).map_err(|_| {
                DbError::StorageError(format!("negative version {v} stored in {}", self.table))
            }),
        }
    }

    async fn write_version(&mut self, version: u64) -> DbResult<()> {
        let stored = i64::try_from(version).map_err(|_| {
            DbError::StorageError(format!("version {version} does not fit in BIGINT"))
        })?;

        let updated = sqlx::query(&format!("UPDATE {} SET version = $1", self.table))
            .bind(stored)
            .execute(self.session.connection())
            .await
            .map_err(|e| DbError::StorageError(format!("update {}: {e}", self.table)))?
            .rows_affected();
        if updated > 0 {
            return Ok(());
        }

        sqlx::query(&format!("INSERT INTO {} (version) VALUES ($1)", self.table))
            .bind(stored)
            .execute(self.session.connection())
            .await
            .map_err(|e| DbError::StorageError(format!("insert into {}: {e}", self.table)))?;
        Ok(())
    }

    async fn apply_script(&mut self, sql: &str) -> DbResult<()> {
        let mut tx = self
            .session
            .connection()
            .begin()
            .await
            .map_err(|e| DbError::ScriptError(format!("BEGIN failed: {e}")))?;

        // Simple query protocol so one script may hold several statements
        if let Err(e) = sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(sql)).await {
            if let Err(rollback) = tx.rollback().await {
                log::warn!("Rollback after failed migration script also failed: {rollback}");
            }
            return Err(DbError::ScriptError(e.to_string()));
        }

        tx.commit()
            .await
            .map_err(|e| DbError::ScriptError(format!("COMMIT failed: {e}")))
    }

    async fn unlock(&mut self) -> DbResult<()> {
        let token = self
            .held
            .take()
            .ok_or_else(|| DbError::LockError("no migration lock is held".to_string()))?;

        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(token.key())
            .fetch_one(self.session.connection())
            .await
            .map_err(|e| DbError::LockError(format!("release lock {token}: {e}")))?;
        if !released {
            return Err(DbError::LockError(format!(
                "lock {token} was not held by this session"
            )));
        }

        log::debug!("Released advisory lock {token} for {}", self.table);
        Ok(())
    }

    fn max_version(&self) -> u64 {
        i64::MAX as u64
    }

    fn db_type(&self) -> &'static str {
        "postgres"
    }
}
