//! Migration lock token and acquisition deadline.
//!
//! Every migrator targeting the same database, schema, and bookkeeping table
//! computes the same [`LockToken`], so they contend for one lock. A custom
//! table name (one per tenant, for example) yields an independent lock.

use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, Instant};

/// Delay between attempts while another session holds the lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Deterministic 64-bit key identifying one bookkeeping table's lock.
///
/// Signed because PostgreSQL advisory locks take a `bigint` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(i64);

impl LockToken {
    /// Derive the token from the database, schema, and table identities.
    pub fn derive(database: &str, schema: &str, table: &str) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in [database, schema, table].iter().enumerate() {
            if i > 0 {
                hasher.update([0u8]);
            }
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();

        let mut key = [0u8; 8];
        key.copy_from_slice(&digest[..8]);
        Self(i64::from_be_bytes(key))
    }

    /// The raw key passed to the database.
    pub fn key(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks how long a lock acquisition has waited against an optional bound.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub(crate) fn start(timeout: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub(crate) fn waited(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn expired(&self) -> bool {
        self.timeout.is_some_and(|t| self.waited() >= t)
    }

    /// How long to sleep before the next attempt: the poll interval, capped
    /// by the time left before the deadline.
    pub(crate) fn next_delay(&self, poll: Duration) -> Duration {
        match self.timeout {
            Some(t) => poll.min(t.saturating_sub(self.waited())),
            None => poll,
        }
    }
}
