//! Runtime context for CLI commands

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tm_core::{Config, CoreError, DbType, MigrationSet, TableName};
use tm_db::{Database, DuckDbBackend};

use crate::cli::GlobalArgs;

/// Loaded configuration with command-line overrides applied
pub(crate) struct RuntimeContext {
    /// Project directory that relative paths resolve against
    pub root: PathBuf,

    /// Effective configuration
    pub config: Config,

    /// Verbose output enabled
    pub verbose: bool,
}

impl RuntimeContext {
    /// Load the configuration named by the global arguments.
    ///
    /// Without `--config`, `tidemark.yml` in the project directory is used
    /// when present and the defaults otherwise.
    pub fn new(args: &GlobalArgs) -> Result<Self> {
        let root = args.project_dir.clone();

        let mut config = match &args.config {
            Some(path) => Config::load(path).context("Failed to load configuration file")?,
            None => match Config::load_from_dir(&root) {
                Ok(config) => config,
                Err(CoreError::ConfigNotFound { .. }) => Config::default(),
                Err(e) => return Err(e).context("Failed to load project configuration"),
            },
        };

        if let Some(url) = &args.database_url {
            config.database.db_type = db_type_for_url(url);
            config.database.url = url.clone();
        }
        if let Some(table) = &args.table {
            config.table = TableName::parse(table.as_str()).context("Invalid --table")?;
        }
        config.validate().context("Invalid configuration")?;

        Ok(Self {
            root,
            config,
            verbose: args.verbose,
        })
    }

    /// Print verbose output if enabled
    pub fn verbose(&self, msg: &str) {
        if self.verbose {
            eprintln!("[verbose] {}", msg);
        }
    }

    /// Absolute-or-project-relative path of the migrations directory.
    pub fn migrations_path(&self) -> PathBuf {
        self.config.migrations_path(&self.root)
    }

    /// Load and validate the migration files.
    pub fn load_migrations(&self) -> Result<MigrationSet> {
        let dir = self.migrations_path();
        self.verbose(&format!("Loading migrations from {}", dir.display()));
        MigrationSet::from_dir(&dir).context("Failed to load migrations")
    }

    /// Open a session on the configured database.
    pub async fn open_database(&self) -> Result<Box<dyn Database>> {
        let table = self.config.table.clone();
        let url = &self.config.database.url;

        match self.config.database.db_type {
            DbType::DuckDb => {
                let path = self.duckdb_path(url);
                self.verbose(&format!("Opening DuckDB database {path}"));
                let db = DuckDbBackend::new(&path, table).context("Failed to open database")?;
                Ok(Box::new(db))
            }
            DbType::Postgres => self.open_postgres(url, table).await,
        }
    }

    /// DuckDB file paths are relative to the project directory.
    fn duckdb_path(&self, url: &str) -> String {
        if url == ":memory:" || Path::new(url).is_absolute() {
            url.to_string()
        } else {
            self.root.join(url).display().to_string()
        }
    }

    #[cfg(feature = "postgres")]
    async fn open_postgres(&self, url: &str, table: TableName) -> Result<Box<dyn Database>> {
        use tm_db::{PgConnectionBackend, PgPoolBackend};

        if self.config.database.pooled {
            self.verbose("Connecting to PostgreSQL through a connection pool");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(1)
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            let db = PgPoolBackend::from_pool(&pool, table, self.config.acquire_timeout())
                .await
                .context("Failed to acquire a pooled connection")?;
            Ok(Box::new(db))
        } else {
            self.verbose("Connecting to PostgreSQL");
            let db = PgConnectionBackend::connect(url, table)
                .await
                .context("Failed to connect to database")?;
            Ok(Box::new(db))
        }
    }

    #[cfg(not(feature = "postgres"))]
    async fn open_postgres(&self, _url: &str, _table: TableName) -> Result<Box<dyn Database>> {
        anyhow::bail!("PostgreSQL support was not compiled in (enable the `postgres` feature)")
    }
}

/// Database type implied by a `--database-url` value.
pub(crate) fn db_type_for_url(url: &str) -> DbType {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        DbType::Postgres
    } else {
        DbType::DuckDb
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
