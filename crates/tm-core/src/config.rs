//! Configuration types and parsing for tidemark.yml

use crate::error::{CoreError, CoreResult};
use crate::table_name::TableName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file names looked up in a project directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["tidemark.yml", "tidemark.yaml"];

/// Main configuration from tidemark.yml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory containing migration SQL files
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,

    /// Bookkeeping table holding the applied version
    #[serde(default)]
    pub table: TableName,

    /// Upper bound on waiting for the migration lock, in seconds
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,

    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            table: TableName::default(),
            lock_timeout_secs: None,
            database: DatabaseConfig::default(),
        }
    }
}

/// Database type selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// DuckDB (default)
    #[default]
    DuckDb,
    /// PostgreSQL
    Postgres,
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::DuckDb => write!(f, "duckdb"),
            DbType::Postgres => write!(f, "postgres"),
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database type (duckdb or postgres)
    #[serde(rename = "type", default)]
    pub db_type: DbType,

    /// DuckDB file path (or `:memory:`) or PostgreSQL connection URL
    #[serde(default = "default_db_url")]
    pub url: String,

    /// PostgreSQL only: run on a session acquired from a connection pool
    #[serde(default)]
    pub pooled: bool,

    /// PostgreSQL pooled only: bound on acquiring the session, in seconds
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::default(),
            url: default_db_url(),
            pooled: false,
            acquire_timeout_secs: None,
        }
    }
}

const DEFAULT_DB_URL: &str = ":memory:";

fn default_db_url() -> String {
    DEFAULT_DB_URL.to_string()
}

fn default_migrations_dir() -> String {
    "migrations".to_string()
}

impl Config {
    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a project directory
    /// Looks for tidemark.yml or tidemark.yaml
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
            .map(|path| Self::load(&path))
            .unwrap_or_else(|| {
                Err(CoreError::ConfigNotFound {
                    path: dir.join(CONFIG_FILE_NAMES[0]).display().to_string(),
                })
            })
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.migrations_dir.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "migrations_dir cannot be empty".to_string(),
            });
        }

        if self.database.url.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "database.url cannot be empty".to_string(),
            });
        }

        if self.lock_timeout_secs == Some(0) {
            return Err(CoreError::ConfigInvalid {
                message: "lock_timeout_secs must be greater than zero when set".to_string(),
            });
        }

        if self.database.db_type != DbType::Postgres
            && (self.database.pooled || self.database.acquire_timeout_secs.is_some())
        {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "database.pooled and database.acquire_timeout_secs only apply to postgres, not {}",
                    self.database.db_type
                ),
            });
        }

        Ok(())
    }

    /// Lock acquisition timeout, if configured
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }

    /// Pool acquire timeout, if configured
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.database.acquire_timeout_secs.map(Duration::from_secs)
    }

    /// Get the absolute migrations directory relative to a project root
    pub fn migrations_path(&self, root: &Path) -> PathBuf {
        root.join(&self.migrations_dir)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
